//! 转发流水线 - 去重、过滤、历史记录与投递
//!
//! 各来源适配器共享同一个去重缓存，并把候选消息推入同一个 channel；
//! `Forwarder` 在后台任务中消费该 channel。

pub mod dedup;
pub mod filter;
pub mod forwarder;
pub mod history;
pub mod message;

pub use dedup::DedupCache;
pub use filter::{should_forward, FilterRepository, FilterRule, FilterTarget, FilterType};
pub use forwarder::{ForwardOutcome, Forwarder};
pub use history::MessageLog;
pub use message::{Candidate, ForwardedMessage, MessageSource};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::ingest::{MmsStore, NotificationListener, SmsReceiver};
use crate::settings::SettingsStore;
use crate::slack::{RetryPolicy, WebhookSender};

/// 测试消息的发送者和正文
pub const TEST_SENDER: &str = "0123456789";
pub const TEST_CONTENT: &str = "This is a test message from routesms";

/// 流水线参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub dedup_ttl: Duration,
    pub mms_delay: Duration,
    pub notification_delay: Duration,
    pub retry: RetryPolicy,
    pub channel_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            dedup_ttl: config.dedup_ttl(),
            mms_delay: config.mms_delay(),
            notification_delay: config.notification_delay(),
            retry: config.retry_policy(),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

/// 已启动的流水线
pub struct Pipeline {
    dedup: Arc<DedupCache>,
    log: Arc<MessageLog>,
    store: Arc<SettingsStore>,
    forwarder: Arc<Forwarder>,
    tx: mpsc::Sender<Candidate>,
    stop: oneshot::Sender<()>,
    worker: JoinHandle<()>,
    options: PipelineOptions,
}

impl Pipeline {
    /// 构建共享服务并启动转发任务（需在 tokio runtime 内调用）
    pub fn start(
        store: Arc<SettingsStore>,
        sender: Arc<dyn WebhookSender>,
        options: PipelineOptions,
    ) -> Self {
        let dedup = Arc::new(DedupCache::new().with_ttl(options.dedup_ttl));
        let log = Arc::new(MessageLog::init(Arc::clone(&store)));
        let forwarder = Arc::new(Forwarder::new(
            Arc::clone(&store),
            Arc::clone(&log),
            sender,
            options.retry,
        ));

        let (tx, rx) = mpsc::channel(options.channel_capacity);
        let (stop, stop_rx) = oneshot::channel();
        let worker = tokio::spawn(Arc::clone(&forwarder).run(rx, stop_rx));
        info!(
            ttl_ms = options.dedup_ttl.as_millis() as u64,
            history = log.len(),
            "Pipeline started"
        );

        Self {
            dedup,
            log,
            store,
            forwarder,
            tx,
            stop,
            worker,
            options,
        }
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    pub fn log(&self) -> &Arc<MessageLog> {
        &self.log
    }

    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    pub fn candidate_sender(&self) -> mpsc::Sender<Candidate> {
        self.tx.clone()
    }

    /// SMS/MMS 适配器
    pub fn sms_receiver(&self, mms_store: Arc<dyn MmsStore>) -> SmsReceiver {
        SmsReceiver::new(Arc::clone(&self.dedup), self.tx.clone(), mms_store)
            .with_mms_delay(self.options.mms_delay)
    }

    /// 通知适配器
    pub fn notification_listener(&self) -> NotificationListener {
        NotificationListener::new(
            Arc::clone(&self.dedup),
            Arc::clone(&self.store),
            self.tx.clone(),
        )
        .with_dedup_wait(self.options.notification_delay)
    }

    /// 直接投递一条测试消息（不经过去重）
    pub async fn send_test(&self) -> ForwardOutcome {
        self.forwarder
            .process(Candidate::new(MessageSource::Test, TEST_SENDER, TEST_CONTENT))
            .await
    }

    /// 关闭 channel 并等待已排队的候选消息和在途投递完成
    ///
    /// 仍存活的适配器之后推送会失败，尚在等待中的 MMS/通知任务只记日志。
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.stop.send(());
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Forwarder task failed");
        }
        info!("Pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemoryMmsStore;
    use crate::slack::{DeliveryError, SlackWebHook};
    use async_trait::async_trait;

    struct NoopSender;

    #[async_trait]
    impl WebhookSender for NoopSender {
        async fn send(&self, _url: &str, _payload: &SlackWebHook) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_with_live_adapters() {
        let pipeline = Pipeline::start(
            Arc::new(SettingsStore::in_memory()),
            Arc::new(NoopSender),
            PipelineOptions::default(),
        );
        let sms = pipeline.sms_receiver(Arc::new(MemoryMmsStore::new()));
        let listener = pipeline.notification_listener();
        let tx = pipeline.candidate_sender();

        tokio::time::timeout(Duration::from_secs(2), pipeline.shutdown())
            .await
            .expect("shutdown does not wait for adapters to be dropped");

        assert!(tx
            .send(Candidate::new(MessageSource::Sms, "010", "after"))
            .await
            .is_err());
        drop((sms, listener));
    }

    #[test]
    fn test_options_from_config() {
        let config = Config {
            dedup_ttl_ms: 500,
            channel_capacity: 0,
            ..Config::default()
        };
        let options = PipelineOptions::from(&config);
        assert_eq!(options.dedup_ttl, Duration::from_millis(500));
        assert_eq!(options.channel_capacity, 1);
        assert_eq!(options.retry, RetryPolicy::default());
    }
}
