//! 投递任务 - 失败后按退避间隔再试（默认共 2 次）

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::client::{DeliveryError, WebhookSender};
use super::payload::SlackWebHook;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 两次尝试之间的等待
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(2),
        }
    }
}

/// 投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// 投递成功
    Success { attempts: u32 },
    /// 放弃（最后一次的错误）
    Failure { attempts: u32, error: String },
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 单条消息的投递任务
pub struct DeliveryJob {
    sender: Arc<dyn WebhookSender>,
    webhook_url: String,
    payload: SlackWebHook,
    policy: RetryPolicy,
}

impl DeliveryJob {
    pub fn new(
        sender: Arc<dyn WebhookSender>,
        webhook_url: impl Into<String>,
        payload: SlackWebHook,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sender,
            webhook_url: webhook_url.into(),
            payload,
            policy,
        }
    }

    /// 执行投递；瞬时错误会重试，配置错误直接放弃
    pub async fn run(self) -> JobResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.sender.send(&self.webhook_url, &self.payload).await {
                Ok(()) => {
                    info!(attempts = attempt, title = ?self.payload.title(), "Webhook delivered");
                    return JobResult::Success { attempts: attempt };
                }
                Err(e) => {
                    let retry = e.is_transient() && attempt < max_attempts;
                    warn!(attempt, retry, error = %e, "Webhook delivery failed");
                    if !retry {
                        return Self::give_up(attempt, e);
                    }
                    sleep(self.policy.backoff).await;
                }
            }
        }
    }

    fn give_up(attempts: u32, error: DeliveryError) -> JobResult {
        JobResult::Failure {
            attempts,
            error: error.to_string(),
        }
    }
}
