//! 运行配置 - 路径、延迟、去重窗口、重试策略
//!
//! 从 `~/.config/routesms/config.json` 读取，文件缺失或损坏时使用默认值，
//! 环境变量优先级最高。

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::slack::client::WEB_HOOK_BASE_URL;
use crate::slack::{RetryPolicy, WebhookConfig};

/// 数据目录环境变量
pub const ENV_DATA_DIR: &str = "ROUTESMS_DATA_DIR";
/// Webhook 基础地址环境变量
pub const ENV_WEBHOOK_BASE: &str = "ROUTESMS_WEBHOOK_BASE";

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 数据目录（settings.json 所在位置），为空时使用 `~/.routesms`
    pub data_dir: Option<PathBuf>,
    pub webhook_base_url: String,
    pub http_timeout_secs: u64,
    pub dedup_ttl_ms: u64,
    pub mms_delay_ms: u64,
    pub notification_delay_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// 候选消息 channel 容量
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            webhook_base_url: WEB_HOOK_BASE_URL.to_string(),
            http_timeout_secs: 30,
            dedup_ttl_ms: 10_000,
            mms_delay_ms: 1_500,
            notification_delay_ms: 3_000,
            retry_max_attempts: 2,
            retry_backoff_ms: 2_000,
            channel_capacity: 64,
        }
    }
}

impl Config {
    /// 默认配置文件路径
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("routesms").join("config.json"))
    }

    /// 加载配置：显式路径优先，其次默认路径，最后套用环境变量
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(&p).unwrap_or_else(|e| {
                warn!(path = %p.display(), error = %e, "Malformed config, using defaults");
                Self::default()
            }),
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 套用环境变量覆盖
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(base) = lookup(ENV_WEBHOOK_BASE).filter(|v| !v.trim().is_empty()) {
            self.webhook_base_url = base.trim().trim_end_matches('/').to_string();
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|h| h.join(".routesms"))
            .ok_or_else(|| anyhow!("Cannot find home directory"))
    }

    pub fn settings_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(SETTINGS_FILE))
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    pub fn mms_delay(&self) -> Duration {
        Duration::from_millis(self.mms_delay_ms)
    }

    pub fn notification_delay(&self) -> Duration {
        Duration::from_millis(self.notification_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            base_url: self.webhook_base_url.clone(),
            timeout_secs: self.http_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.dedup_ttl(), Duration::from_secs(10));
        assert_eq!(config.mms_delay(), Duration::from_millis(1500));
        assert_eq!(config.notification_delay(), Duration::from_millis(3000));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"mms_delay_ms": 500, "data_dir": "/tmp/rs"}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.mms_delay(), Duration::from_millis(500));
        assert_eq!(config.notification_delay_ms, 3000);
        assert_eq!(
            config.settings_path().unwrap(),
            PathBuf::from("/tmp/rs/settings.json")
        );
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = Config::load(Some(&path));
        assert_eq!(config.dedup_ttl_ms, 10_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            ENV_DATA_DIR => Some("/data/routesms".to_string()),
            ENV_WEBHOOK_BASE => Some("http://127.0.0.1:9000/".to_string()),
            _ => None,
        });
        assert_eq!(config.data_dir, Some(PathBuf::from("/data/routesms")));
        assert_eq!(config.webhook_config().base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_blank_env_ignored() {
        let mut config = Config::default();
        config.apply_env(|_| Some("  ".to_string()));
        assert_eq!(config, Config::default());
    }
}
