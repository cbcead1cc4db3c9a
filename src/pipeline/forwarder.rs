//! 转发决策 - 消费候选消息，过滤后投递到 Slack 并记录历史

use chrono::Local;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::filter::{should_forward, FilterRepository};
use super::history::MessageLog;
use super::message::{Candidate, ForwardedMessage, MessageSource};
use crate::settings::SettingsStore;
use crate::slack::{DeliveryJob, RetryPolicy, SlackWebHook, WebhookSender};

/// 单条候选消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// 转发总开关关闭
    Disabled,
    /// 被过滤规则拦截
    Blocked,
    /// 投递成功
    Delivered,
    /// 投递失败（已重试）
    Failed,
}

/// 转发器
pub struct Forwarder {
    store: Arc<SettingsStore>,
    log: Arc<MessageLog>,
    sender: Arc<dyn WebhookSender>,
    policy: RetryPolicy,
}

impl Forwarder {
    pub fn new(
        store: Arc<SettingsStore>,
        log: Arc<MessageLog>,
        sender: Arc<dyn WebhookSender>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            log,
            sender,
            policy,
        }
    }

    /// 持续消费 channel，直到所有发送端关闭或收到停止信号
    ///
    /// 停止时先关闭 channel（之后的推送会失败），再处理完已排队的候选消息
    /// 和在途投递。
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Candidate>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut in_flight = JoinSet::new();
        let mut closing = false;

        loop {
            tokio::select! {
                next = rx.recv() => {
                    let Some(candidate) = next else { break };
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move { this.process(candidate).await });
                }
                _ = &mut shutdown, if !closing => {
                    debug!("Shutdown requested, closing candidate channel");
                    closing = true;
                    rx.close();
                }
            }

            // 顺手回收已完成的任务
            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    warn!(error = %e, "Forwarding task panicked");
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "Forwarding task panicked");
            }
        }
        debug!("Candidate channel closed, forwarder stopped");
    }

    /// 处理一条候选消息
    pub async fn process(&self, candidate: Candidate) -> ForwardOutcome {
        let source = candidate.source;

        if source != MessageSource::Test && !self.store.forwarding_enabled() {
            debug!(source = %source, sender = %candidate.sender, "Forwarding disabled, skipped");
            return ForwardOutcome::Disabled;
        }

        let rules = FilterRepository::new(&self.store).load();
        if !should_forward(&candidate.sender, &candidate.content, &rules) {
            info!(source = %source, sender = %candidate.sender, "Filtered out");
            self.log.add_message(
                self.record(&candidate)
                    .with_blocked(true)
                    .with_slack_result(false),
            );
            return ForwardOutcome::Blocked;
        }

        let payload = SlackWebHook::for_candidate(&candidate);
        let job = DeliveryJob::new(
            Arc::clone(&self.sender),
            self.store.webhook_url(),
            payload,
            self.policy,
        );
        let result = job.run().await;
        let delivered = result.is_success();

        self.log
            .add_message(self.record(&candidate).with_slack_result(delivered));

        if delivered {
            if let Err(e) = self.store.record_forwarded(Local::now().date_naive()) {
                warn!(error = %e, "Failed to update forwarded counters");
            }
            info!(source = %source, sender = %candidate.sender, "Message forwarded");
            ForwardOutcome::Delivered
        } else {
            warn!(source = %source, sender = %candidate.sender, result = ?result, "Message not delivered");
            ForwardOutcome::Failed
        }
    }

    fn record(&self, candidate: &Candidate) -> ForwardedMessage {
        ForwardedMessage::new(candidate.source, &candidate.sender, &candidate.content)
            .with_timestamp(candidate.captured_at)
    }
}
