//! 事件桥接 - 从输入流逐行读取 JSON 事件并分发给各适配器
//!
//! 每行一个对象，按 `kind` 区分：
//! `sms` / `wap_push` / `listener_connected` / `notification` / `mms_snapshot`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ingest::pdu::decode_hex;
use crate::ingest::{
    BroadcastIntent, MemoryMmsStore, NotificationListener, PendingResult, PostedNotification,
    SmsReceiver,
};
use crate::pipeline::Pipeline;

/// 桥接事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// 短信广播（十六进制 PDU）
    Sms {
        pdus: Vec<String>,
        #[serde(default)]
        format: Option<String>,
    },
    /// 彩信到达
    WapPush,
    /// 通知监听（重新）连接
    ListenerConnected,
    /// 状态栏通知
    Notification {
        package: String,
        post_time: i64,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    /// 加载彩信 provider 快照
    MmsSnapshot { path: PathBuf },
}

impl BridgeEvent {
    /// 解析一行；空行返回 `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let event = serde_json::from_str(line).context("Invalid bridge event")?;
        Ok(Some(event))
    }
}

/// 事件分发器
pub struct Bridge {
    sms: SmsReceiver,
    notifications: NotificationListener,
    mms_store: Arc<MemoryMmsStore>,
    pending: Vec<JoinHandle<()>>,
}

impl Bridge {
    pub fn new(pipeline: &Pipeline) -> Self {
        Self::with_mms_store(pipeline, Arc::new(MemoryMmsStore::new()))
    }

    pub fn with_mms_store(pipeline: &Pipeline, mms_store: Arc<MemoryMmsStore>) -> Self {
        Self {
            sms: pipeline.sms_receiver(mms_store.clone()),
            notifications: pipeline.notification_listener(),
            mms_store,
            pending: Vec::new(),
        }
    }

    pub fn mms_store(&self) -> &Arc<MemoryMmsStore> {
        &self.mms_store
    }

    /// 处理一个事件
    pub async fn handle(&mut self, event: BridgeEvent) -> Result<()> {
        match event {
            BridgeEvent::Sms { pdus, format } => {
                let pdus = pdus
                    .iter()
                    .map(|hex| decode_hex(hex))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Invalid PDU hex")?;
                let (pending, _done) = PendingResult::new();
                let intent = BroadcastIntent::SmsReceived { pdus, format };
                let handle = self.sms.on_receive(intent, pending).await;
                self.track(handle);
            }
            BridgeEvent::WapPush => {
                let (pending, _done) = PendingResult::new();
                let handle = self
                    .sms
                    .on_receive(BroadcastIntent::WapPushReceived, pending)
                    .await;
                self.track(handle);
            }
            BridgeEvent::ListenerConnected => self.notifications.on_listener_connected(),
            BridgeEvent::Notification {
                package,
                post_time,
                title,
                text,
            } => {
                let handle = self.notifications.on_notification_posted(PostedNotification {
                    package,
                    post_time,
                    title,
                    text,
                });
                self.track(handle);
            }
            BridgeEvent::MmsSnapshot { path } => {
                self.mms_store.load_json(&path)?;
                info!(path = %path.display(), "MMS snapshot loaded");
            }
        }
        Ok(())
    }

    /// 解析并处理一行
    pub async fn handle_line(&mut self, line: &str) -> Result<()> {
        match BridgeEvent::parse(line)? {
            Some(event) => self.handle(event).await,
            None => Ok(()),
        }
    }

    /// 读取直到 EOF，然后等待所有延迟任务结束
    ///
    /// 单行出错只记日志，不影响后续事件。
    pub async fn run<R>(mut self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Err(e) = self.handle_line(&line).await {
                warn!(error = %e, "Bridge event rejected");
            }
        }
        debug!(pending = self.pending.len(), "Bridge input closed");
        self.drain().await;
        Ok(())
    }

    /// 等待所有延迟任务结束
    pub async fn drain(&mut self) {
        for handle in self.pending.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Ingestion task failed");
            }
        }
    }

    fn track(&mut self, handle: Option<JoinHandle<()>>) {
        self.pending.retain(|h| !h.is_finished());
        if let Some(handle) = handle {
            self.pending.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        let sms = BridgeEvent::parse(r#"{"kind":"sms","pdus":["00"],"format":"3gpp"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            sms,
            BridgeEvent::Sms {
                pdus: vec!["00".to_string()],
                format: Some("3gpp".to_string())
            }
        );

        assert_eq!(
            BridgeEvent::parse(r#"{"kind":"wap_push"}"#).unwrap(),
            Some(BridgeEvent::WapPush)
        );

        let n = BridgeEvent::parse(
            r#"{"kind":"notification","package":"com.android.mms","post_time":5,"title":"A"}"#,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(n, BridgeEvent::Notification { text: None, post_time: 5, .. }));
    }

    #[test]
    fn test_parse_blank_and_garbage() {
        assert_eq!(BridgeEvent::parse("   ").unwrap(), None);
        assert!(BridgeEvent::parse(r#"{"kind":"fax"}"#).is_err());
        assert!(BridgeEvent::parse("not json").is_err());
    }
}
