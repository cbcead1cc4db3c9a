//! 过滤规则 - 黑名单/白名单判定
//!
//! 判定优先级：
//! 1. 拦截规则（最高优先级）：命中即不转发
//! 2. 放行规则：只要存在放行规则，就只转发命中的消息
//! 3. 无有效规则：全部转发
//!
//! 所有拦截规则先于放行规则检查，结果与规则存储顺序无关。

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::dedup::normalize_sender;
use crate::settings::SettingsStore;

/// 规则类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterType {
    /// 拦截：命中则不转发
    Block,
    /// 放行：存在放行规则时只转发命中的消息
    Allow,
}

/// 规则匹配对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterTarget {
    /// 发送者号码
    PhoneNumber,
    /// 正文关键字
    Keyword,
}

fn default_enabled() -> bool {
    true
}

/// 过滤规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub target: FilterTarget,
    pub pattern: String,
    #[serde(rename = "isEnabled", default = "default_enabled")]
    pub is_enabled: bool,
}

impl FilterRule {
    /// 创建新规则（随机 id，默认启用）
    pub fn new(filter_type: FilterType, target: FilterTarget, pattern: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filter_type,
            target,
            pattern: pattern.into(),
            is_enabled: true,
        }
    }

    /// 规则是否命中消息
    pub fn matches(&self, sender: &str, content: &str) -> bool {
        match self.target {
            FilterTarget::PhoneNumber => {
                normalize_sender(sender).contains(&normalize_sender(&self.pattern))
            }
            FilterTarget::Keyword => content
                .to_lowercase()
                .contains(&self.pattern.to_lowercase()),
        }
    }
}

/// 判断消息是否应该转发（纯函数）
pub fn should_forward(sender: &str, content: &str, rules: &[FilterRule]) -> bool {
    let active: Vec<&FilterRule> = rules.iter().filter(|r| r.is_enabled).collect();
    if active.is_empty() {
        return true;
    }

    let (block, allow): (Vec<&FilterRule>, Vec<&FilterRule>) = active
        .into_iter()
        .partition(|r| r.filter_type == FilterType::Block);

    if let Some(rule) = block.iter().find(|r| r.matches(sender, content)) {
        debug!(rule_id = %rule.id, "Message matched block rule");
        return false;
    }

    if !allow.is_empty() {
        return allow.iter().any(|r| r.matches(sender, content));
    }

    true
}

/// 解析规则数组；格式错误时返回空列表
pub fn parse_filters(json: &str) -> Vec<FilterRule> {
    match serde_json::from_str::<Vec<FilterRule>>(json) {
        Ok(rules) => rules,
        Err(e) => {
            warn!(error = %e, "Malformed filter rules, treating as empty");
            Vec::new()
        }
    }
}

/// 规则仓库 - 在设置存储上维护规则列表
pub struct FilterRepository<'a> {
    store: &'a SettingsStore,
}

impl<'a> FilterRepository<'a> {
    pub fn new(store: &'a SettingsStore) -> Self {
        Self { store }
    }

    /// 当前规则快照
    pub fn load(&self) -> Vec<FilterRule> {
        parse_filters(&self.store.filter_rules_json())
    }

    pub fn save(&self, rules: &[FilterRule]) -> Result<()> {
        self.store.save_filter_rules_json(serde_json::to_string(rules)?)
    }

    pub fn add(&self, rule: FilterRule) -> Result<()> {
        let mut rules = self.load();
        rules.push(rule);
        self.save(&rules)
    }

    /// 按 id 替换规则
    pub fn update(&self, rule: FilterRule) -> Result<()> {
        let mut rules = self.load();
        let slot = rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| anyhow!("Filter rule not found: {}", rule.id))?;
        *slot = rule;
        self.save(&rules)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut rules = self.load();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Err(anyhow!("Filter rule not found: {}", id));
        }
        self.save(&rules)
    }

    /// 切换启用状态，返回新状态
    pub fn toggle(&self, id: &str) -> Result<bool> {
        let mut rules = self.load();
        let rule = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("Filter rule not found: {}", id))?;
        rule.is_enabled = !rule.is_enabled;
        let enabled = rule.is_enabled;
        self.save(&rules)?;
        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_phone(p: &str) -> FilterRule {
        FilterRule::new(FilterType::Block, FilterTarget::PhoneNumber, p)
    }

    fn allow_keyword(p: &str) -> FilterRule {
        FilterRule::new(FilterType::Allow, FilterTarget::Keyword, p)
    }

    #[test]
    fn test_no_rules_forwards_everything() {
        assert!(should_forward("010", "anything", &[]));
    }

    #[test]
    fn test_disabled_rules_are_ignored() {
        let mut rule = block_phone("010");
        rule.is_enabled = false;
        assert!(should_forward("01012345678", "hi", &[rule]));
    }

    #[test]
    fn test_block_only_blacklist() {
        let rules = vec![block_phone("1012345678")];
        assert!(!should_forward("+821012345678", "hello", &rules));
        assert!(should_forward("+821099990000", "hello", &rules));
    }

    #[test]
    fn test_block_matches_normalized_pattern() {
        let rules = vec![block_phone("010-1234")];
        assert!(!should_forward("01012345678", "x", &rules));
    }

    #[test]
    fn test_allow_only_whitelist() {
        let rules = vec![allow_keyword("OTP")];
        assert!(should_forward("1588", "Your otp is 1234", &rules));
        assert!(!should_forward("1588", "Weekly newsletter", &rules));
    }

    #[test]
    fn test_block_takes_precedence_over_allow() {
        let rules = vec![
            allow_keyword("otp"),
            FilterRule::new(FilterType::Block, FilterTarget::Keyword, "spam"),
        ];
        assert!(!should_forward("1588", "spam otp", &rules));
    }

    #[test]
    fn test_order_independent() {
        let a = vec![allow_keyword("otp"), block_phone("1588")];
        let b = vec![block_phone("1588"), allow_keyword("otp")];
        assert_eq!(
            should_forward("1588", "otp 1", &a),
            should_forward("1588", "otp 1", &b)
        );
    }

    #[test]
    fn test_parse_filters_malformed_is_empty() {
        assert!(parse_filters("{broken").is_empty());
        assert!(parse_filters("[]").is_empty());
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"[{"id":"r1","type":"BLOCK","target":"PHONE_NUMBER","pattern":"010"}]"#;
        let rules = parse_filters(json);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].filter_type, FilterType::Block);
        assert_eq!(rules[0].target, FilterTarget::PhoneNumber);
        assert!(rules[0].is_enabled);
    }

    #[test]
    fn test_repository_crud() {
        let store = SettingsStore::in_memory();
        let repo = FilterRepository::new(&store);

        let rule = block_phone("010");
        let id = rule.id.clone();
        repo.add(rule).unwrap();
        assert_eq!(repo.load().len(), 1);

        assert!(!repo.toggle(&id).unwrap());
        assert!(!repo.load()[0].is_enabled);

        let mut edited = repo.load()[0].clone();
        edited.pattern = "011".to_string();
        repo.update(edited).unwrap();
        assert_eq!(repo.load()[0].pattern, "011");

        repo.delete(&id).unwrap();
        assert!(repo.load().is_empty());
        assert!(repo.delete(&id).is_err());
    }
}
