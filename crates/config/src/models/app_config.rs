use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    autograde::AutogradeConfig, database::DatabaseConfig, observability::ObservabilityConfig,
};
use crate::validation::ConfigValidator;

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/autograder.toml",
    "autograder.toml",
    "/etc/autograder/config.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub autograde: AutogradeConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("AUTOGRADER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.database.validate()?;
        self.autograde.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutorKind, LogFormat};
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.autograde.workers, 16);
        assert_eq!(config.autograde.executor.kind, ExecutorKind::Mock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[database]
url = "sqlite::memory:"
max_connections = 1

[autograde]
enabled = true
workers = 4
queue_capacity = 8

[autograde.executor]
kind = "sandbox"

[autograde.executor.sandbox]
interpreter_path = "/opt/python/python.wasm"
stdlib_path = "/opt/python/lib"
memory_limit_bytes = 134217728

[observability]
log_level = "debug"
log_format = "json"
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.autograde.workers, 4);
        assert_eq!(config.autograde.queue_capacity, 8);
        assert_eq!(config.autograde.executor.kind, ExecutorKind::Sandbox);
        assert_eq!(
            config.autograde.executor.sandbox.memory_limit_bytes,
            134_217_728
        );
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_app_config_rejects_unknown_executor() {
        let toml_str = r#"
[autograde.executor]
kind = "importlib.SomeExecutor"
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_app_config_rejects_invalid_sandbox_limit() {
        let toml_str = r#"
[autograde.executor]
kind = "sandbox"

[autograde.executor.sandbox]
interpreter_path = "/opt/python/python.wasm"
stdlib_path = "/opt/python/lib"
memory_limit_bytes = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_app_config_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("Failed to create temp file");
        writeln!(
            file,
            "[autograde]\nworkers = 2\n\n[autograde.executor]\nkind = \"direct\"\n"
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = AppConfig::load(Some(&path)).expect("Failed to load config");
        assert_eq!(config.autograde.workers, 2);
        assert_eq!(config.autograde.executor.kind, ExecutorKind::Direct);
        assert_eq!(config.autograde.queue_capacity, 128);
    }

    #[test]
    fn test_app_config_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/autograder.toml")).is_err());
    }

    #[test]
    fn test_app_config_toml_roundtrip() {
        let config = AppConfig::default();
        let serialized = config.to_toml().expect("Failed to serialize");
        let parsed = AppConfig::from_toml(&serialized).expect("Failed to parse");
        assert_eq!(parsed.autograde.workers, config.autograde.workers);
    }
}
