//! filters 命令 - 管理过滤规则

use anyhow::Result;
use clap::{Subcommand, ValueEnum};

use super::output::{format_rule, to_json};
use crate::pipeline::{FilterRepository, FilterRule, FilterTarget, FilterType};
use crate::settings::SettingsStore;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RuleKind {
    Block,
    Allow,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RuleTarget {
    Phone,
    Keyword,
}

impl From<RuleKind> for FilterType {
    fn from(kind: RuleKind) -> Self {
        match kind {
            RuleKind::Block => FilterType::Block,
            RuleKind::Allow => FilterType::Allow,
        }
    }
}

impl From<RuleTarget> for FilterTarget {
    fn from(target: RuleTarget) -> Self {
        match target {
            RuleTarget::Phone => FilterTarget::PhoneNumber,
            RuleTarget::Keyword => FilterTarget::Keyword,
        }
    }
}

#[derive(Subcommand)]
pub enum FiltersCommand {
    /// 列出所有规则
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 添加规则
    Add {
        /// block 或 allow
        #[arg(long = "type", value_enum)]
        kind: RuleKind,
        /// phone 或 keyword
        #[arg(long, value_enum)]
        target: RuleTarget,
        /// 匹配内容（号码片段或关键字）
        pattern: String,
    },
    /// 删除规则
    Remove {
        /// 规则 ID
        id: String,
    },
    /// 启用/停用规则
    Toggle {
        /// 规则 ID
        id: String,
    },
}

/// 处理 filters 命令
pub fn handle_filters(store: &SettingsStore, command: FiltersCommand) -> Result<()> {
    let repo = FilterRepository::new(store);
    match command {
        FiltersCommand::List { json } => {
            let rules = repo.load();
            if json {
                println!("{}", to_json(&rules));
            } else if rules.is_empty() {
                println!("No filter rules");
            } else {
                for rule in &rules {
                    println!("{}", format_rule(rule));
                }
            }
        }
        FiltersCommand::Add {
            kind,
            target,
            pattern,
        } => {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                anyhow::bail!("Pattern must not be empty");
            }
            let rule = FilterRule::new(kind.into(), target.into(), pattern);
            let id = rule.id.clone();
            repo.add(rule)?;
            println!("✓ Added rule {}", id);
        }
        FiltersCommand::Remove { id } => {
            repo.delete(&id)?;
            println!("✓ Removed rule {}", id);
        }
        FiltersCommand::Toggle { id } => {
            let enabled = repo.toggle(&id)?;
            println!("✓ Rule {} is now {}", id, if enabled { "on" } else { "off" });
        }
    }
    Ok(())
}
