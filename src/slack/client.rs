//! Slack Webhook 客户端

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::payload::SlackWebHook;

/// Slack Webhook 默认基础地址
pub const WEB_HOOK_BASE_URL: &str = "https://hooks.slack.com";

/// 表示成功的响应体
pub const RESULT_OK: &str = "ok";

/// 投递错误
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 未配置 webhook
    #[error("Webhook URL is not configured")]
    MissingWebhook,
    /// 网络/HTTP 错误
    #[error("HTTP request failed: {0}")]
    Http(String),
    /// Slack 返回了非 "ok" 的结果
    #[error("Webhook rejected (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

impl DeliveryError {
    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::MissingWebhook)
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Webhook 发送接口
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// 发送一次；`Ok(())` 表示服务端返回 "ok"
    async fn send(&self, webhook_url: &str, payload: &SlackWebHook) -> Result<(), DeliveryError>;
}

/// Webhook 客户端配置
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// 基础地址（测试时可替换）
    pub base_url: String,
    /// 超时时间 (秒)
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: WEB_HOOK_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

/// 基于 reqwest 的 Slack 客户端
#[derive(Debug)]
pub struct SlackWebhookClient {
    client: Client,
    config: WebhookConfig,
}

impl SlackWebhookClient {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client, config })
    }

    /// 拼接请求地址：接受路径（services/...）或完整 URL
    pub fn resolve_url(&self, webhook_url: &str) -> Result<String, DeliveryError> {
        resolve_url(&self.config.base_url, webhook_url)
    }
}

/// 拼接 `{base}/{path}`；已经是完整 URL 时保留其路径部分
pub fn resolve_url(base_url: &str, webhook_url: &str) -> Result<String, DeliveryError> {
    let trimmed = webhook_url.trim();
    if trimmed.is_empty() {
        return Err(DeliveryError::MissingWebhook);
    }
    let path = trimmed
        .strip_prefix(WEB_HOOK_BASE_URL)
        .unwrap_or(trimmed)
        .trim_start_matches('/');
    if path.is_empty() {
        return Err(DeliveryError::MissingWebhook);
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }
    Ok(format!("{}/{}", base_url.trim_end_matches('/'), path))
}

#[async_trait]
impl WebhookSender for SlackWebhookClient {
    async fn send(&self, webhook_url: &str, payload: &SlackWebHook) -> Result<(), DeliveryError> {
        let url = self.resolve_url(webhook_url)?;

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = status.as_u16(), body = %body, "Webhook response");

        if status.is_success() && body.trim() == RESULT_OK {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
