//! 消息历史 - 最近 50 条处理记录，最新在前
//!
//! 内存状态通过 `watch` channel 暴露，每次追加后同步写回设置存储。

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::warn;

use super::message::ForwardedMessage;
use crate::settings::SettingsStore;

/// 最多保留的记录数
pub const MAX_MESSAGES: usize = 50;

/// 消息历史
pub struct MessageLog {
    store: Arc<SettingsStore>,
    /// 追加与落盘在同一把锁内完成
    append_lock: Mutex<()>,
    tx: watch::Sender<Vec<ForwardedMessage>>,
}

impl MessageLog {
    /// 从设置存储加载历史；数据缺失或损坏时为空
    pub fn init(store: Arc<SettingsStore>) -> Self {
        let messages = Self::parse(&store.message_history_json());
        let (tx, _) = watch::channel(messages);
        Self {
            store,
            append_lock: Mutex::new(()),
            tx,
        }
    }

    fn parse(json: &str) -> Vec<ForwardedMessage> {
        if json.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Vec<ForwardedMessage>>(json) {
            Ok(mut messages) => {
                messages.truncate(MAX_MESSAGES);
                messages
            }
            Err(e) => {
                warn!(error = %e, "Malformed message history, starting empty");
                Vec::new()
            }
        }
    }

    /// 追加一条记录（插入到最前并截断）
    pub fn add_message(&self, message: ForwardedMessage) {
        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut updated = Vec::with_capacity(MAX_MESSAGES);
        updated.push(message);
        updated.extend(self.tx.borrow().iter().take(MAX_MESSAGES - 1).cloned());

        match serde_json::to_string(&updated) {
            Ok(json) => {
                if let Err(e) = self.store.save_message_history_json(json) {
                    warn!(error = %e, "Failed to persist message history");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize message history"),
        }

        self.tx.send_replace(updated);
    }

    /// 当前记录快照
    pub fn snapshot(&self) -> Vec<ForwardedMessage> {
        self.tx.borrow().clone()
    }

    /// 订阅记录变更
    pub fn subscribe(&self) -> watch::Receiver<Vec<ForwardedMessage>> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::message::MessageSource;
    use crate::settings::Settings;

    fn msg(i: usize) -> ForwardedMessage {
        ForwardedMessage::new(MessageSource::Sms, "010", format!("message {}", i))
    }

    #[test]
    fn test_bounded_newest_first() {
        let log = MessageLog::init(Arc::new(SettingsStore::in_memory()));
        for i in 0..60 {
            log.add_message(msg(i));
        }

        let messages = log.snapshot();
        assert_eq!(messages.len(), MAX_MESSAGES);
        assert_eq!(messages[0].content, "message 59");
        assert_eq!(messages[49].content, "message 10");
    }

    #[test]
    fn test_persisted_and_reloaded() {
        let store = Arc::new(SettingsStore::in_memory());
        let log = MessageLog::init(Arc::clone(&store));
        log.add_message(msg(1));
        log.add_message(msg(2).with_blocked(true));

        let reloaded = MessageLog::init(store);
        let messages = reloaded.snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "message 2");
        assert!(messages[0].blocked);
    }

    #[test]
    fn test_malformed_history_is_empty() {
        let store = SettingsStore::with_settings(Settings {
            message_history_json: "[{\"oops\"".to_string(),
            ..Settings::default()
        });
        let log = MessageLog::init(Arc::new(store));
        assert!(log.is_empty());
    }

    #[test]
    fn test_subscribe_sees_appends() {
        let log = MessageLog::init(Arc::new(SettingsStore::in_memory()));
        let mut rx = log.subscribe();
        log.add_message(msg(7));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update()[0].content, "message 7");
    }

    #[test]
    fn test_concurrent_appends_keep_every_entry() {
        let log = Arc::new(MessageLog::init(Arc::new(SettingsStore::in_memory())));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        log.add_message(msg(t * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 40);
    }
}
