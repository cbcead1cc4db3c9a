//! Slack 投递 - 载荷格式化、Webhook 客户端和重试任务

pub mod client;
pub mod job;
pub mod payload;

pub use client::{DeliveryError, SlackWebhookClient, WebhookConfig, WebhookSender};
pub use job::{DeliveryJob, JobResult, RetryPolicy};
pub use payload::SlackWebHook;
