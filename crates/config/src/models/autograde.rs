use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

use super::executor::ExecutorConfig;

/// 自动评分配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutogradeConfig {
    /// 是否启用自动评分
    pub enabled: bool,
    /// Worker数量，每个Worker持有独立的执行器实例
    pub workers: usize,
    /// 任务队列容量，队列满时提交方阻塞等待
    pub queue_capacity: usize,
    /// 执行器配置
    pub executor: ExecutorConfig,
}

impl Default for AutogradeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 16,
            queue_capacity: 128,
            executor: ExecutorConfig::default(),
        }
    }
}

impl ConfigValidator for AutogradeConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.workers, "autograde.workers", 1024)?;
        ValidationUtils::validate_count(self.queue_capacity, "autograde.queue_capacity", 100_000)?;
        self.executor.validate()?;
        Ok(())
    }
}
