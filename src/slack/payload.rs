//! Slack Incoming Webhook 载荷

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::pipeline::message::{Candidate, MessageSource};

/// 接收时间显示格式
pub const RECEIVED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 单个字段（label/value）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// 附件（标题、侧边颜色、时间戳、字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub title: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    pub fields: Vec<Field>,
}

/// Webhook 请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackWebHook {
    pub attachments: Vec<Attachment>,
}

impl SlackWebHook {
    pub fn builder() -> SlackWebHookBuilder {
        SlackWebHookBuilder::default()
    }

    /// 按来源生成标准转发载荷
    pub fn for_candidate(candidate: &Candidate) -> Self {
        Self::builder()
            .title(title_for(candidate.source))
            .color(color_for(candidate.source))
            .timestamp_enabled(true)
            .field("From", &candidate.sender)
            .field("Content", &candidate.content)
            .field(
                "Received at",
                candidate.received_at.format(RECEIVED_AT_FORMAT).to_string(),
            )
            .build()
    }

    pub fn title(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.title.as_str())
    }
}

/// 载荷构建器
#[derive(Debug, Default)]
pub struct SlackWebHookBuilder {
    title: String,
    color: String,
    timestamp_enabled: bool,
    now: Option<DateTime<Local>>,
    fields: Vec<Field>,
}

impl SlackWebHookBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn timestamp_enabled(mut self, enabled: bool) -> Self {
        self.timestamp_enabled = enabled;
        self
    }

    /// 固定时间戳（测试用）
    pub fn now(mut self, now: DateTime<Local>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn field(mut self, title: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(Field {
            title: title.into(),
            value: value.into(),
            short: false,
        });
        self
    }

    pub fn build(self) -> SlackWebHook {
        let ts = self
            .timestamp_enabled
            .then(|| self.now.unwrap_or_else(Local::now).timestamp());
        SlackWebHook {
            attachments: vec![Attachment {
                title: self.title,
                color: self.color,
                ts,
                fields: self.fields,
            }],
        }
    }
}

/// 来源对应的标题
pub fn title_for(source: MessageSource) -> &'static str {
    match source {
        MessageSource::Sms => "SMS received",
        MessageSource::Mms => "MMS received",
        MessageSource::Rcs => "Message notification received",
        MessageSource::Test => "Test message",
    }
}

/// 来源对应的侧边颜色
pub fn color_for(source: MessageSource) -> &'static str {
    match source {
        MessageSource::Sms => "#0000FF",
        MessageSource::Mms => "#00AA00",
        MessageSource::Rcs => "#00CC00",
        MessageSource::Test => "#FF0000",
    }
}
