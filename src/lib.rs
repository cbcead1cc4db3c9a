//! routesms - 把收到的短信、彩信和消息应用通知转发到 Slack

pub mod bridge;
pub mod cli;
pub mod config;
pub mod ingest;
pub mod pipeline;
pub mod settings;
pub mod slack;

pub use bridge::{Bridge, BridgeEvent};
pub use config::Config;
pub use ingest::{
    BroadcastIntent, MemoryMmsStore, MmsStore, NotificationListener, PendingResult,
    PostedNotification, SmsReceiver,
};
pub use pipeline::{
    Candidate, DedupCache, FilterRepository, FilterRule, FilterTarget, FilterType, ForwardOutcome,
    ForwardedMessage, Forwarder, MessageLog, MessageSource, Pipeline, PipelineOptions,
};
pub use settings::{Settings, SettingsStore};
pub use slack::{
    DeliveryError, DeliveryJob, JobResult, RetryPolicy, SlackWebHook, SlackWebhookClient,
    WebhookConfig, WebhookSender,
};
