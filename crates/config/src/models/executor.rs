use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 执行器类型，封闭集合：未知类型在配置加载阶段即被拒绝
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Mock,
    Direct,
    Sandbox,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Mock => "mock",
            ExecutorKind::Direct => "direct",
            ExecutorKind::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutorConfig {
    pub kind: ExecutorKind,
    pub mock: MockExecutorConfig,
    pub direct: DirectExecutorConfig,
    pub sandbox: SandboxExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockExecutorConfig {
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectExecutorConfig {
    /// 宿主机上的Python解释器
    pub interpreter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxExecutorConfig {
    /// Python解释器WASM模块路径
    pub interpreter_path: String,
    /// Python标准库目录路径（只读挂载）
    pub stdlib_path: String,
    /// 内存上限（字节）
    pub memory_limit_bytes: i64,
}

impl Default for MockExecutorConfig {
    fn default() -> Self {
        Self {
            output: "Mock output".to_string(),
        }
    }
}

impl Default for DirectExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

impl Default for SandboxExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter_path: String::new(),
            stdlib_path: String::new(),
            memory_limit_bytes: 1 << 28,
        }
    }
}

impl ConfigValidator for ExecutorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        match self.kind {
            ExecutorKind::Mock => Ok(()),
            ExecutorKind::Direct => ValidationUtils::validate_not_empty(
                &self.direct.interpreter,
                "autograde.executor.direct.interpreter",
            ),
            ExecutorKind::Sandbox => self.sandbox.validate(),
        }
    }
}

impl ConfigValidator for SandboxExecutorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(
            &self.interpreter_path,
            "autograde.executor.sandbox.interpreter_path",
        )?;
        ValidationUtils::validate_not_empty(
            &self.stdlib_path,
            "autograde.executor.sandbox.stdlib_path",
        )?;
        if self.memory_limit_bytes <= 0 {
            return Err(crate::ConfigError::Validation(
                "autograde.executor.sandbox.memory_limit_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
