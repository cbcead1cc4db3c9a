//! 消息来源适配器 - 把系统回调转换为候选消息

pub mod mms;
pub mod notification;
pub mod pdu;
pub mod sms;

pub use mms::{MemoryMmsStore, MmsSnapshot, MmsStore};
pub use notification::{NotificationListener, PostedNotification};
pub use sms::{BroadcastIntent, PendingResult, SmsReceiver};
