use std::sync::Arc;

use autograder_config::{ExecutorConfig, ExecutorKind};
use autograder_domain::GradingResult;
use tracing::info;

use crate::executors::{DirectExecutor, MockExecutor, NotebookExecutor, SandboxExecutor};

/// 根据配置创建执行器
///
/// 执行器类型是封闭集合，未知类型在配置反序列化时已被拒绝。
pub struct ExecutorFactory {
    config: ExecutorConfig,
}

impl ExecutorFactory {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn kind(&self) -> ExecutorKind {
        self.config.kind
    }

    pub fn get_config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// 创建单个执行器
    pub fn create(&self) -> GradingResult<Arc<dyn NotebookExecutor>> {
        let executor: Arc<dyn NotebookExecutor> = match self.config.kind {
            ExecutorKind::Mock => Arc::new(MockExecutor::new(self.config.mock.output.clone())),
            ExecutorKind::Direct => {
                Arc::new(DirectExecutor::new(self.config.direct.interpreter.clone()))
            }
            ExecutorKind::Sandbox => Arc::new(SandboxExecutor::new(&self.config.sandbox)?),
        };
        info!("创建执行器: kind={}", self.config.kind);
        Ok(executor)
    }

    /// 为每个Worker创建一个独立的执行器实例
    ///
    /// 沙箱解释器模块只编译一次，各实例共享编译结果但各自创建虚拟机。
    pub fn create_executors(&self, count: usize) -> GradingResult<Vec<Arc<dyn NotebookExecutor>>> {
        match self.config.kind {
            ExecutorKind::Sandbox => {
                let prototype = SandboxExecutor::new(&self.config.sandbox)?;
                info!("创建 {} 个沙箱执行器", count);
                Ok((0..count)
                    .map(|_| Arc::new(prototype.clone()) as Arc<dyn NotebookExecutor>)
                    .collect())
            }
            _ => (0..count).map(|_| self.create()).collect(),
        }
    }
}
