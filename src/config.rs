use std::path::Path;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use crate::validation::ValidationConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub session: SessionConfig,
}

/// 会话配置
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// 同时上传的最大数量
    pub max_concurrent: usize,
    /// 选择文件后立即入队
    pub auto_start: bool,
    /// 没有父实体时不开始传输
    pub require_parent: bool,
    pub validation: ValidationConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            auto_start: false,
            require_parent: true,
            validation: ValidationConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&config_str).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(config_str: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(config_str)?;
        if config.endpoint.trim().is_empty() {
            anyhow::bail!("endpoint must not be empty");
        }
        Ok(config)
    }
}
