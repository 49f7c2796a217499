pub mod database;

pub use database::sqlite::{DatabaseManager, SqliteGradeRepository, SqliteSubmissionRepository};
