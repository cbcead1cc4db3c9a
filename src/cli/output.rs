//! Output formatting for CLI commands

use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::pipeline::{FilterRule, FilterTarget, FilterType, ForwardedMessage};
use crate::settings::Settings;

/// Pretty JSON; falls back to an empty object
pub fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// 单条历史记录
pub fn format_message(msg: &ForwardedMessage) -> String {
    let time = Local
        .timestamp_millis_opt(msg.timestamp)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    let status = if msg.blocked {
        "blocked"
    } else if msg.slack_result {
        "sent"
    } else {
        "failed"
    };
    format!(
        "{} [{}] {:<7} {} | {}",
        time,
        msg.source,
        status,
        msg.sender,
        msg.content.replace('\n', " ")
    )
}

pub fn format_rule(rule: &FilterRule) -> String {
    let kind = match rule.filter_type {
        FilterType::Block => "BLOCK",
        FilterType::Allow => "ALLOW",
    };
    let target = match rule.target {
        FilterTarget::PhoneNumber => "phone",
        FilterTarget::Keyword => "keyword",
    };
    let state = if rule.is_enabled { "on" } else { "off" };
    format!("{}  {:<5} {:<7} {:<3} {}", rule.id, kind, target, state, rule.pattern)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub forwarding_enabled: bool,
    pub webhook_configured: bool,
    pub daily_message_count: u32,
    pub last_count_reset_date: String,
    pub forwarded_total_count: u32,
}

impl From<&Settings> for Stats {
    fn from(s: &Settings) -> Self {
        Self {
            forwarding_enabled: s.forwarding_enabled,
            webhook_configured: !s.webhook_url.trim().is_empty(),
            daily_message_count: s.daily_message_count,
            last_count_reset_date: s.last_count_reset_date.clone(),
            forwarded_total_count: s.forwarded_total_count,
        }
    }
}

pub fn format_stats(stats: &Stats) -> String {
    format!(
        "Forwarding: {}\nWebhook:    {}\nToday:      {} ({})\nTotal:      {}",
        if stats.forwarding_enabled { "on" } else { "off" },
        if stats.webhook_configured { "configured" } else { "not set" },
        stats.daily_message_count,
        if stats.last_count_reset_date.is_empty() {
            "-"
        } else {
            stats.last_count_reset_date.as_str()
        },
        stats.forwarded_total_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MessageSource;

    #[test]
    fn test_format_message_status() {
        let blocked = ForwardedMessage::new(MessageSource::Sms, "010", "a\nb")
            .with_blocked(true)
            .with_slack_result(false);
        let line = format_message(&blocked);
        assert!(line.contains("[SMS] blocked"));
        assert!(line.ends_with("010 | a b"));

        let failed = ForwardedMessage::new(MessageSource::Rcs, "Bob", "x").with_slack_result(false);
        assert!(format_message(&failed).contains("failed"));
    }

    #[test]
    fn test_stats_from_settings() {
        let settings = Settings {
            webhook_url: "services/T/B/x".to_string(),
            daily_message_count: 3,
            forwarded_total_count: 9,
            ..Settings::default()
        };
        let stats = Stats::from(&settings);
        assert!(stats.webhook_configured);
        let text = format_stats(&stats);
        assert!(text.contains("Today:      3 (-)"));
        assert!(text.contains("Total:      9"));
        assert!(to_json(&stats).contains("\"forwardedTotalCount\": 9"));
    }
}
