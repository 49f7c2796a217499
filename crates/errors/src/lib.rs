use thiserror::Error;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("提交记录未找到: {id}")]
    SubmissionNotFound { id: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("代码执行错误: {0}")]
    Execution(String),
    #[error("沙箱错误: {0}")]
    Sandbox(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("自动评分服务未运行")]
    ServiceNotRunning,
    #[error("任务队列已关闭")]
    QueueClosed,
    #[error("无效的任务状态转换: 任务 {job_id} 从 {from} 到 {to}")]
    InvalidJobTransition {
        job_id: String,
        from: String,
        to: String,
    },
    #[error("成绩上报错误: {0}")]
    Reporting(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type GradingResult<T> = Result<T, GradingError>;

impl GradingError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn submission_not_found<S: Into<String>>(id: S) -> Self {
        Self::SubmissionNotFound { id: id.into() }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn execution_error<S: Into<String>>(msg: S) -> Self {
        Self::Execution(msg.into())
    }
    pub fn sandbox_error<S: Into<String>>(msg: S) -> Self {
        Self::Sandbox(msg.into())
    }
    pub fn reporting_error<S: Into<String>>(msg: S) -> Self {
        Self::Reporting(msg.into())
    }
    pub fn invalid_transition<J, F, T>(job_id: J, from: F, to: T) -> Self
    where
        J: Into<String>,
        F: ToString,
        T: ToString,
    {
        Self::InvalidJobTransition {
            job_id: job_id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GradingError::Internal(_) | GradingError::Configuration(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GradingError::DatabaseOperation(_)
                | GradingError::Reporting(_)
                | GradingError::QueueClosed
        )
    }
}

impl From<serde_json::Error> for GradingError {
    fn from(err: serde_json::Error) -> Self {
        GradingError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for GradingError {
    fn from(err: anyhow::Error) -> Self {
        GradingError::Internal(err.to_string())
    }
}
