//! 通知监听 - 兜底捕获不走短信广播的消息（主要是 RCS）
//!
//! 总是让 SMS/MMS 路径先处理：收到通知后等待一段时间再查去重缓存，
//! 缓存中没有任何痕迹时才作为 RCS 消息推送。

use chrono::Local;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::pipeline::dedup::DedupCache;
use crate::pipeline::message::{Candidate, MessageSource};
use crate::settings::SettingsStore;

/// 监听的消息应用包名
pub const MESSAGING_PACKAGES: [&str; 5] = [
    "com.google.android.apps.messaging",
    "com.samsung.android.messaging",
    "com.android.mms",
    "com.lge.message",
    "com.sonyericsson.conversations",
];

/// 系统隐藏敏感通知内容时显示的文本
pub const SENSITIVE_CONTENT_HIDDEN: &str = "Sensitive notification content hidden";

/// 默认去重等待时间
pub const DEFAULT_DEDUP_WAIT: Duration = Duration::from_millis(3000);

/// 状态栏通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedNotification {
    pub package: String,
    /// 发布时间（epoch 毫秒）
    pub post_time: i64,
    /// 标题（发送者）
    pub title: Option<String>,
    /// 正文
    pub text: Option<String>,
}

/// 通知监听器
pub struct NotificationListener {
    dedup: Arc<DedupCache>,
    store: Arc<SettingsStore>,
    tx: mpsc::Sender<Candidate>,
    dedup_wait: Duration,
    /// 连接时间，早于此时间发布的通知不处理
    connected_at: AtomicI64,
}

impl NotificationListener {
    pub fn new(
        dedup: Arc<DedupCache>,
        store: Arc<SettingsStore>,
        tx: mpsc::Sender<Candidate>,
    ) -> Self {
        Self {
            dedup,
            store,
            tx,
            dedup_wait: DEFAULT_DEDUP_WAIT,
            connected_at: AtomicI64::new(Local::now().timestamp_millis()),
        }
    }

    /// 设置去重等待时间
    pub fn with_dedup_wait(mut self, wait: Duration) -> Self {
        self.dedup_wait = wait;
        self
    }

    /// 监听重新连接
    pub fn on_listener_connected(&self) {
        let now = Local::now().timestamp_millis();
        self.connected_at.store(now, Ordering::SeqCst);
        debug!(connected_at = now, "Listener connected");
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at.load(Ordering::SeqCst)
    }

    /// 处理一条通知；被同步过滤掉时返回 `None`
    pub fn on_notification_posted(&self, notification: PostedNotification) -> Option<JoinHandle<()>> {
        if !MESSAGING_PACKAGES.contains(&notification.package.as_str()) {
            return None;
        }

        let connected_at = self.connected_at();
        if notification.post_time < connected_at {
            debug!(
                package = %notification.package,
                post_time = notification.post_time,
                connected_at,
                "Old notification ignored"
            );
            return None;
        }

        let sender = notification.title?;
        let content = notification.text?;
        if content == SENSITIVE_CONTENT_HIDDEN {
            debug!(sender = %sender, "Sensitive content hidden by OS, skipped");
            return None;
        }

        let dedup = Arc::clone(&self.dedup);
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        let wait = self.dedup_wait;

        Some(tokio::spawn(async move {
            sleep(wait).await;

            if !store.forwarding_enabled() {
                debug!(sender = %sender, "Forwarding disabled, skipped RCS");
                return;
            }

            if dedup.is_duplicate(&sender, &content) {
                debug!(sender = %sender, "Already handled (sender+content match), skipped");
                return;
            }
            if dedup.is_duplicate_by_sender(&sender) {
                debug!(sender = %sender, "Already handled (sender match), skipped");
                return;
            }
            if dedup.is_duplicate_by_content(&content) {
                debug!(sender = %sender, "Already handled (content match), skipped");
                return;
            }

            dedup.register_content(&sender, &content);

            info!(sender = %sender, "Notification-only message received");
            let candidate = Candidate::new(MessageSource::Rcs, sender, content);
            if tx.send(candidate).await.is_err() {
                warn!("Forwarder is gone, RCS message dropped");
            }
        }))
    }
}
