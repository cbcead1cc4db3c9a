//! 彩信存储抽象 - 对应系统的 MMS content provider
//!
//! 查询最近一条彩信，按 `type = 137`（发件人）解析地址，
//! 并从 `text/plain` 分段读取正文。

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// 发件人地址类型（PduHeaders.FROM）
pub const ADDRESS_TYPE_FROM: i32 = 137;

/// 纯文本分段的 content type
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// `content://mms` 中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmsRow {
    #[serde(rename = "_id")]
    pub id: String,
    /// 时间（epoch 秒）
    pub date: i64,
}

/// `content://mms/{id}/addr` 中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmsAddress {
    pub msg_id: String,
    pub address: String,
    #[serde(rename = "type")]
    pub address_type: i32,
}

/// `content://mms/part` 中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmsPart {
    #[serde(rename = "_id")]
    pub id: String,
    pub mid: String,
    pub ct: String,
    /// 外部数据路径；为空时正文在 `text` 列
    #[serde(rename = "_data", default)]
    pub data: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// 彩信存储
pub trait MmsStore: Send + Sync {
    /// 最近一条彩信（按 date 降序）
    fn latest_message(&self) -> Result<Option<MmsRow>>;

    /// 指定彩信的地址行
    fn addresses(&self, msg_id: &str) -> Result<Vec<MmsAddress>>;

    /// 所有分段行
    fn parts(&self) -> Result<Vec<MmsPart>>;

    /// 打开分段的字节流
    fn open_part(&self, part_id: &str) -> Result<Box<dyn Read + Send>>;
}

/// 最近一条彩信的发件人和正文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmsMessage {
    pub id: String,
    pub sender: String,
    pub body: String,
}

/// 读取最近一条彩信；任一部分缺失时返回 `None`
pub fn read_latest_mms(store: &dyn MmsStore) -> Result<Option<MmsMessage>> {
    let Some(row) = store.latest_message()? else {
        debug!("No MMS rows found");
        return Ok(None);
    };

    let sender = parse_number(store, &row.id)?;
    let body = parse_message(store, &row.id)?;

    match (sender, body) {
        (Some(sender), Some(body)) => Ok(Some(MmsMessage {
            id: row.id,
            sender,
            body,
        })),
        _ => {
            debug!(mms_id = %row.id, "MMS sender or body missing");
            Ok(None)
        }
    }
}

fn parse_number(store: &dyn MmsStore, id: &str) -> Result<Option<String>> {
    Ok(store
        .addresses(id)?
        .into_iter()
        .find(|a| a.msg_id == id && a.address_type == ADDRESS_TYPE_FROM)
        .map(|a| a.address))
}

fn parse_message(store: &dyn MmsStore, id: &str) -> Result<Option<String>> {
    let parts = store.parts()?;
    let Some(part) = parts
        .iter()
        .find(|p| p.mid == id && p.ct == CONTENT_TYPE_TEXT)
    else {
        return Ok(None);
    };

    let external = part.data.as_deref().is_some_and(|d| !d.is_empty());
    if !external {
        return Ok(part.text.clone());
    }

    let stream = store.open_part(&part.id)?;
    Ok(Some(read_part_stream(stream)?))
}

/// 逐行读取分段内容，遇到空行停止，行之间直接拼接
fn read_part_stream(stream: Box<dyn Read + Send>) -> Result<String> {
    let reader = BufReader::new(stream);
    let mut out = String::new();
    for line in reader.lines() {
        let line = line.context("Failed to read MMS part")?;
        if line.is_empty() {
            break;
        }
        out.push_str(&line);
    }
    Ok(out)
}

/// 快照数据（与 provider 的三张表对应）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MmsSnapshot {
    pub messages: Vec<MmsRow>,
    pub addresses: Vec<MmsAddress>,
    pub parts: Vec<MmsPart>,
    /// part id -> 分段内容
    pub part_data: HashMap<String, String>,
}

/// 内存彩信存储；可从桥接端导出的 JSON 快照加载
#[derive(Default)]
pub struct MemoryMmsStore {
    snapshot: Mutex<MmsSnapshot>,
}

impl MemoryMmsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: MmsSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    /// 用 JSON 文件内容替换当前快照
    pub fn load_json(&self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read MMS snapshot {}", path.display()))?;
        let snapshot: MmsSnapshot = serde_json::from_str(&content)?;
        self.replace(snapshot);
        Ok(())
    }

    pub fn replace(&self, snapshot: MmsSnapshot) {
        *self.lock() = snapshot;
    }

    /// 追加一条带纯文本分段的彩信
    pub fn insert_text_message(&self, id: &str, date: i64, sender: &str, text: &str) {
        let mut s = self.lock();
        s.messages.push(MmsRow { id: id.to_string(), date });
        s.addresses.push(MmsAddress {
            msg_id: id.to_string(),
            address: sender.to_string(),
            address_type: ADDRESS_TYPE_FROM,
        });
        s.parts.push(MmsPart {
            id: format!("{}-text", id),
            mid: id.to_string(),
            ct: CONTENT_TYPE_TEXT.to_string(),
            data: None,
            text: Some(text.to_string()),
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MmsSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MmsStore for MemoryMmsStore {
    fn latest_message(&self) -> Result<Option<MmsRow>> {
        Ok(self.lock().messages.iter().max_by_key(|m| m.date).cloned())
    }

    fn addresses(&self, msg_id: &str) -> Result<Vec<MmsAddress>> {
        Ok(self
            .lock()
            .addresses
            .iter()
            .filter(|a| a.msg_id == msg_id)
            .cloned()
            .collect())
    }

    fn parts(&self) -> Result<Vec<MmsPart>> {
        Ok(self.lock().parts.clone())
    }

    fn open_part(&self, part_id: &str) -> Result<Box<dyn Read + Send>> {
        let data = self
            .lock()
            .part_data
            .get(part_id)
            .cloned()
            .ok_or_else(|| anyhow!("MMS part not found: {}", part_id))?;
        Ok(Box::new(Cursor::new(data.into_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_yields_nothing() {
        let store = MemoryMmsStore::new();
        assert_eq!(read_latest_mms(&store).unwrap(), None);
    }

    #[test]
    fn test_latest_inline_text() {
        let store = MemoryMmsStore::new();
        store.insert_text_message("1", 100, "01011112222", "old");
        store.insert_text_message("2", 200, "01033334444", "new");

        let mms = read_latest_mms(&store).unwrap().unwrap();
        assert_eq!(mms.id, "2");
        assert_eq!(mms.sender, "01033334444");
        assert_eq!(mms.body, "new");
    }

    #[test]
    fn test_only_from_address_is_used() {
        let store = MemoryMmsStore::new();
        store.replace(MmsSnapshot {
            messages: vec![MmsRow { id: "7".into(), date: 1 }],
            addresses: vec![MmsAddress {
                msg_id: "7".into(),
                address: "01000000000".into(),
                address_type: 151, // TO
            }],
            parts: vec![MmsPart {
                id: "p".into(),
                mid: "7".into(),
                ct: CONTENT_TYPE_TEXT.into(),
                data: None,
                text: Some("hi".into()),
            }],
            part_data: HashMap::new(),
        });
        assert_eq!(read_latest_mms(&store).unwrap(), None);
    }

    #[test]
    fn test_external_part_read_until_blank_line() {
        let mut part_data = HashMap::new();
        part_data.insert("p1".to_string(), "line one\nline two\n\nignored".to_string());
        let store = MemoryMmsStore::from_snapshot(MmsSnapshot {
            messages: vec![MmsRow { id: "9".into(), date: 1 }],
            addresses: vec![MmsAddress {
                msg_id: "9".into(),
                address: "+821055556666".into(),
                address_type: ADDRESS_TYPE_FROM,
            }],
            parts: vec![
                MmsPart {
                    id: "img".into(),
                    mid: "9".into(),
                    ct: "image/jpeg".into(),
                    data: Some("/data/img".into()),
                    text: None,
                },
                MmsPart {
                    id: "p1".into(),
                    mid: "9".into(),
                    ct: CONTENT_TYPE_TEXT.into(),
                    data: Some("/data/part1".into()),
                    text: None,
                },
            ],
            part_data,
        });

        let mms = read_latest_mms(&store).unwrap().unwrap();
        assert_eq!(mms.body, "line oneline two");
    }

    #[test]
    fn test_missing_part_stream_is_error() {
        let store = MemoryMmsStore::from_snapshot(MmsSnapshot {
            messages: vec![MmsRow { id: "3".into(), date: 1 }],
            addresses: vec![MmsAddress {
                msg_id: "3".into(),
                address: "010".into(),
                address_type: ADDRESS_TYPE_FROM,
            }],
            parts: vec![MmsPart {
                id: "gone".into(),
                mid: "3".into(),
                ct: CONTENT_TYPE_TEXT.into(),
                data: Some("/data/gone".into()),
                text: None,
            }],
            part_data: HashMap::new(),
        });
        assert!(read_latest_mms(&store).is_err());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = r#"{
            "messages": [{"_id": "5", "date": 10}],
            "addresses": [{"msg_id": "5", "address": "010", "type": 137}],
            "parts": [{"_id": "a", "mid": "5", "ct": "text/plain", "text": "yo"}]
        }"#;
        let snapshot: MmsSnapshot = serde_json::from_str(json).unwrap();
        let store = MemoryMmsStore::from_snapshot(snapshot);
        assert_eq!(read_latest_mms(&store).unwrap().unwrap().body, "yo");
    }
}
