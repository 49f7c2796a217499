pub mod sqlite_grade_repository;
pub mod sqlite_submission_repository;

pub use sqlite_grade_repository::SqliteGradeRepository;
pub use sqlite_submission_repository::SqliteSubmissionRepository;

use autograder_config::DatabaseConfig;
use autograder_domain::GradingResult;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS submissions (
        id TEXT PRIMARY KEY,
        assignment_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        lms_user_id TEXT,
        status TEXT NOT NULL DEFAULT 'SUBMITTED',
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notebook_submissions (
        id TEXT PRIMARY KEY,
        submission_id TEXT NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
        notebook_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cell_submissions (
        notebook_submission_id TEXT NOT NULL REFERENCES notebook_submissions(id) ON DELETE CASCADE,
        cell_id TEXT NOT NULL,
        submitted_source TEXT NOT NULL,
        PRIMARY KEY (notebook_submission_id, cell_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS grades (
        id TEXT PRIMARY KEY,
        notebook_submission_id TEXT NOT NULL REFERENCES notebook_submissions(id) ON DELETE CASCADE,
        cell_id TEXT NOT NULL,
        auto_score REAL,
        manual_score REAL,
        extra_credit REAL NOT NULL DEFAULT 0,
        needs_manual_grading INTEGER NOT NULL DEFAULT 1,
        execution_error TEXT,
        graded_at TEXT,
        graded_by TEXT,
        UNIQUE (notebook_submission_id, cell_id)
    )
    "#,
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> GradingResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("已连接数据库: {}", config.url);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建评分相关的表，可重复执行
    pub async fn migrate(&self) -> GradingResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("数据库表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> GradingResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
