//! 短信/彩信接收 - 处理系统广播并推送候选消息
//!
//! - SMS：解码 PDU，多段正文拼接后立即处理
//! - MMS：收到 WAP push 后延迟查询彩信存储（等待系统写入 provider）

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::mms::{read_latest_mms, MmsStore};
use super::pdu::{self, SmsPdu};
use crate::pipeline::dedup::DedupCache;
use crate::pipeline::message::{Candidate, MessageSource};

/// 彩信 provider 就绪的默认等待时间
pub const DEFAULT_MMS_DELAY: Duration = Duration::from_millis(1500);

/// 系统广播
#[derive(Debug, Clone)]
pub enum BroadcastIntent {
    /// `SMS_RECEIVED`：一条或多条 PDU
    SmsReceived {
        pdus: Vec<Vec<u8>>,
        format: Option<String>,
    },
    /// `WAP_PUSH_RECEIVED`：新彩信到达
    WapPushReceived,
}

/// 广播的异步完成令牌
///
/// 无论处理成功、失败还是 panic，drop 时都会通知系统已完成。
pub struct PendingResult {
    done: Option<oneshot::Sender<()>>,
}

impl PendingResult {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { done: Some(tx) }, rx)
    }

    /// 通知已完成
    pub fn finish(mut self) {
        self.complete();
    }

    fn complete(&mut self) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for PendingResult {
    fn drop(&mut self) {
        self.complete();
    }
}

/// 短信/彩信接收器
#[derive(Clone)]
pub struct SmsReceiver {
    dedup: Arc<DedupCache>,
    tx: mpsc::Sender<Candidate>,
    mms_store: Arc<dyn MmsStore>,
    mms_delay: Duration,
}

impl SmsReceiver {
    pub fn new(
        dedup: Arc<DedupCache>,
        tx: mpsc::Sender<Candidate>,
        mms_store: Arc<dyn MmsStore>,
    ) -> Self {
        Self {
            dedup,
            tx,
            mms_store,
            mms_delay: DEFAULT_MMS_DELAY,
        }
    }

    /// 设置彩信查询延迟
    pub fn with_mms_delay(mut self, delay: Duration) -> Self {
        self.mms_delay = delay;
        self
    }

    /// 处理一条广播
    ///
    /// SMS 在当前任务内处理完毕后返回 `None`；
    /// MMS 返回延迟任务的 handle，令牌在任务结束时完成。
    pub async fn on_receive(
        &self,
        intent: BroadcastIntent,
        pending: PendingResult,
    ) -> Option<JoinHandle<()>> {
        match intent {
            BroadcastIntent::SmsReceived { pdus, format } => {
                self.handle_sms(&pdus, format.as_deref()).await;
                pending.finish();
                None
            }
            BroadcastIntent::WapPushReceived => Some(self.spawn_mms(pending)),
        }
    }

    async fn handle_sms(&self, pdus: &[Vec<u8>], format: Option<&str>) {
        let Some((sender, body, received_at)) = parse_sms(pdus, format) else {
            debug!(parts = pdus.len(), "No decodable SMS in broadcast");
            return;
        };
        self.forward(MessageSource::Sms, sender, body, received_at).await;
    }

    /// 延迟后查询彩信存储
    pub fn spawn_mms(&self, pending: PendingResult) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            // 令牌随任务结束一起 drop
            let _pending = pending;
            sleep(this.mms_delay).await;

            match read_latest_mms(this.mms_store.as_ref()) {
                Ok(Some(mms)) => {
                    this.forward(MessageSource::Mms, mms.sender, mms.body, Local::now())
                        .await;
                }
                Ok(None) => debug!("No MMS to forward"),
                Err(e) => error!(error = %e, "MMS parsing error"),
            }
        })
    }

    /// SMS/MMS 共用：去重后登记并推送
    async fn forward(
        &self,
        source: MessageSource,
        sender: String,
        content: String,
        received_at: DateTime<Local>,
    ) {
        if self.dedup.is_duplicate(&sender, &content) {
            debug!(source = %source, sender = %sender, "Duplicate skipped");
            return;
        }
        self.dedup.register(&sender, &content);

        let candidate = Candidate::new(source, sender, content).received_at(received_at);
        info!(source = %source, sender = %candidate.sender, "Message received");
        if self.tx.send(candidate).await.is_err() {
            warn!(source = %source, "Forwarder is gone, message dropped");
        }
    }
}

/// 解码广播中的全部 PDU：发送者和时间取第一段，正文按顺序拼接
pub fn parse_sms(
    pdus: &[Vec<u8>],
    format: Option<&str>,
) -> Option<(String, String, DateTime<Local>)> {
    if let Some(f) = format.filter(|f| !f.eq_ignore_ascii_case(pdu::FORMAT_3GPP)) {
        warn!(
            format = f,
            parts = pdus.len(),
            "Unsupported SMS format (CDMA), broadcast dropped"
        );
        return None;
    }

    let mut parts: Vec<SmsPdu> = pdus
        .iter()
        .filter_map(|raw| match pdu::decode(raw, format) {
            Ok(sms) => Some(sms),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable PDU");
                None
            }
        })
        .collect();

    let first = parts.first()?;
    let sender = first.originating_address.clone();
    if sender.is_empty() {
        return None;
    }
    let received_at = first.received_at().unwrap_or_else(Local::now);

    if parts.iter().all(|p| p.concat.is_some()) {
        parts.sort_by_key(|p| p.concat.map(|c| c.sequence));
    }
    let body: String = parts.iter().map(|p| p.body.as_str()).collect();

    Some((sender, body, received_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::mms::{MemoryMmsStore, MmsAddress, MmsPart, MmsRow};
    use crate::ingest::pdu::decode_hex;
    use anyhow::anyhow;
    use std::io::Read;

    const PART1: &str = "0044 0C91280121436587 00 08 62301090030063 0C 0500032A0201 00680065006C";
    const PART2: &str = "0044 0C91280121436587 00 08 62301090030063 0A 0500032A0202 006C006F";

    fn receiver(store: Arc<dyn MmsStore>) -> (SmsReceiver, mpsc::Receiver<Candidate>, Arc<DedupCache>) {
        let dedup = Arc::new(DedupCache::new());
        let (tx, rx) = mpsc::channel(8);
        let r = SmsReceiver::new(Arc::clone(&dedup), tx, store).with_mms_delay(Duration::from_millis(10));
        (r, rx, dedup)
    }

    #[test]
    fn test_parse_concatenated_out_of_order() {
        let pdus = vec![decode_hex(PART2).unwrap(), decode_hex(PART1).unwrap()];
        let (sender, body, _) = parse_sms(&pdus, Some("3gpp")).unwrap();
        assert_eq!(sender, "+821012345678");
        assert_eq!(body, "hello");
    }

    #[test]
    fn test_parse_gsm7_concatenated() {
        let first = "0044 0C91280121436587 00 00 62301090030063 0C 0500032A0201 D06536FB0D";
        let second = "0044 0C91280121436587 00 00 62301090030063 0C 0500032A0202 EE6F399B0C";
        let pdus = vec![decode_hex(second).unwrap(), decode_hex(first).unwrap()];
        let (sender, body, _) = parse_sms(&pdus, Some("3gpp")).unwrap();
        assert_eq!(sender, "+821012345678");
        assert_eq!(body, "helloworld");
    }

    #[test]
    fn test_parse_cdma_format_dropped() {
        let pdus = vec![decode_hex(PART1).unwrap()];
        assert!(parse_sms(&pdus, Some("3gpp2")).is_none());
    }

    #[test]
    fn test_parse_skips_garbage() {
        let pdus = vec![vec![0xFF], decode_hex(PART1).unwrap()];
        let (_, body, _) = parse_sms(&pdus, None).unwrap();
        assert_eq!(body, "hel");
        assert!(parse_sms(&[vec![0x00]], None).is_none());
    }

    #[tokio::test]
    async fn test_sms_duplicate_pushed_once() {
        let (r, mut rx, dedup) = receiver(Arc::new(MemoryMmsStore::new()));
        let intent = BroadcastIntent::SmsReceived {
            pdus: vec![decode_hex(PART1).unwrap(), decode_hex(PART2).unwrap()],
            format: None,
        };

        let (pending, done) = PendingResult::new();
        assert!(r.on_receive(intent.clone(), pending).await.is_none());
        done.await.unwrap();
        let (pending, _done) = PendingResult::new();
        r.on_receive(intent, pending).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.source, MessageSource::Sms);
        assert_eq!(first.content, "hello");
        assert!(rx.try_recv().is_err());
        assert!(dedup.is_duplicate_by_sender("+821012345678"));
    }

    #[tokio::test]
    async fn test_mms_delayed_query() {
        let store = Arc::new(MemoryMmsStore::new());
        store.insert_text_message("1", 10, "01055556666", "picture caption");
        let (r, mut rx, _) = receiver(store);

        let (pending, done) = PendingResult::new();
        let handle = r.on_receive(BroadcastIntent::WapPushReceived, pending).await.unwrap();
        handle.await.unwrap();
        done.await.unwrap();

        let c = rx.recv().await.unwrap();
        assert_eq!(c.source, MessageSource::Mms);
        assert_eq!(c.sender, "01055556666");
        assert_eq!(c.content, "picture caption");
    }

    #[tokio::test]
    async fn test_mms_without_rows_does_nothing() {
        let (r, mut rx, _) = receiver(Arc::new(MemoryMmsStore::new()));
        let (pending, done) = PendingResult::new();
        r.spawn_mms(pending).await.unwrap();
        done.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    struct BrokenStore;

    impl MmsStore for BrokenStore {
        fn latest_message(&self) -> anyhow::Result<Option<MmsRow>> {
            Err(anyhow!("provider unavailable"))
        }
        fn addresses(&self, _: &str) -> anyhow::Result<Vec<MmsAddress>> {
            Ok(Vec::new())
        }
        fn parts(&self) -> anyhow::Result<Vec<MmsPart>> {
            Ok(Vec::new())
        }
        fn open_part(&self, _: &str) -> anyhow::Result<Box<dyn Read + Send>> {
            Err(anyhow!("no part"))
        }
    }

    #[tokio::test]
    async fn test_mms_failure_still_completes_token() {
        let (r, mut rx, _) = receiver(Arc::new(BrokenStore));
        let (pending, done) = PendingResult::new();
        r.spawn_mms(pending).await.unwrap();
        assert!(done.await.is_ok());
        assert!(rx.try_recv().is_err());
    }
}
