pub mod app_config;
pub mod autograde;
pub mod database;
pub mod executor;
pub mod observability;

pub use app_config::*;
pub use autograde::*;
pub use database::*;
pub use executor::*;
pub use observability::*;
