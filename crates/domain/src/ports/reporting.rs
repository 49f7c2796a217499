use async_trait::async_trait;

use crate::GradingResult;

/// 外部评分平台成绩上报端口
///
/// 只消费 `submit_score` 调用约定，具体协议客户端由外部实现。
#[async_trait]
pub trait ScoreReporter: Send + Sync {
    async fn submit_score(
        &self,
        course_external_id: &str,
        assignment_external_id: &str,
        user_external_id: &str,
        score: f64,
        score_max: Option<f64>,
    ) -> GradingResult<()>;
}
