//! 消息模型 - 来源标签、转发记录和候选消息

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 消息来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageSource {
    /// 短信广播
    Sms,
    /// 彩信（轮询 content provider）
    Mms,
    /// 通知监听（RCS 等）
    Rcs,
    /// 手动测试消息
    Test,
}

impl MessageSource {
    /// 持久化/日志用的标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Mms => "MMS",
            Self::Rcs => "RCS",
            Self::Test => "TEST",
        }
    }
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// 已处理消息记录（转发或被过滤）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedMessage {
    pub source: MessageSource,
    pub sender: String,
    pub content: String,
    /// 捕获时间（epoch 毫秒）
    pub timestamp: i64,
    /// Slack 投递结果
    #[serde(default = "default_true")]
    pub slack_result: bool,
    /// 是否被过滤规则拦截
    #[serde(default)]
    pub blocked: bool,
}

impl ForwardedMessage {
    pub fn new(source: MessageSource, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source,
            sender: sender.into(),
            content: content.into(),
            timestamp: Local::now().timestamp_millis(),
            slack_result: true,
            blocked: false,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_slack_result(mut self, slack_result: bool) -> Self {
        self.slack_result = slack_result;
        self
    }

    pub fn with_blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self
    }
}

/// 候选消息 - 适配器推入内部 channel 的单元
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source: MessageSource,
    pub sender: String,
    pub content: String,
    /// 发送方时间（短信取服务中心时间戳），只用于展示
    pub received_at: DateTime<Local>,
    /// 捕获时间（epoch 毫秒），写入历史记录
    pub captured_at: i64,
}

impl Candidate {
    pub fn new(source: MessageSource, sender: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            source,
            sender: sender.into(),
            content: content.into(),
            received_at: now,
            captured_at: now.timestamp_millis(),
        }
    }

    /// 设置接收时间
    pub fn received_at(mut self, received_at: DateTime<Local>) -> Self {
        self.received_at = received_at;
        self
    }
}
