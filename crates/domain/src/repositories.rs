//! 领域仓储抽象
//!
//! 定义评分结果持久化的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;

use crate::entities::{Grade, Submission};
use crate::GradingResult;

/// 成绩仓储抽象
#[async_trait]
pub trait GradeRepository: Send + Sync {
    /// 在单个事务中批量写入成绩并将提交状态推进到 GRADED，失败时整体回滚
    async fn save_results(&self, submission_id: &str, grades: &[Grade]) -> GradingResult<()>;

    /// 读取某次提交的全部成绩（包括人工评分字段）
    async fn find_grades_by_submission(&self, submission_id: &str) -> GradingResult<Vec<Grade>>;
}

/// 提交记录仓储抽象
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// 登记提交及其笔记本提交记录，已存在时保持不变
    async fn register(&self, submission: &Submission) -> GradingResult<()>;

    async fn find_by_id(&self, id: &str) -> GradingResult<Option<Submission>>;
}
