//! routesms CLI
//!
//! 短信/彩信/RCS 转发到 Slack

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use routesms::cli::{
    format_message, format_stats, handle_filters, handle_run, handle_send_test, to_json,
    FiltersCommand, RunArgs, Stats,
};
use routesms::ingest::pdu;
use routesms::{Config, ForwardOutcome, MessageLog, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "routesms")]
#[command(about = "Forward SMS/MMS/RCS messages to a Slack webhook")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/routesms/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动转发守护进程（从 stdin 读取桥接事件）
    Run(RunArgs),
    /// 发送一条测试消息
    SendTest,
    /// Webhook 配置
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// 转发总开关
    Forwarding {
        #[command(subcommand)]
        state: ForwardingState,
    },
    /// 过滤规则管理
    Filters {
        #[command(subcommand)]
        action: FiltersCommand,
    },
    /// 查看转发历史
    History {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 最多显示条数
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// 查看转发统计
    Stats {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 重置当日计数
    ResetDaily,
    /// 解码一条十六进制 SMS-DELIVER PDU（诊断用）
    ///
    /// 仅支持 3GPP (GSM/UMTS) 格式；CDMA (3gpp2) 短信不会被解码，也不会被转发。
    DecodePdu {
        /// 十六进制 PDU
        hex: String,
        /// PDU 格式（仅支持 3gpp，3gpp2 会报错）
        #[arg(long)]
        format: Option<String>,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// 设置 Webhook 路径或完整 URL
    Set { url: String },
    /// 显示当前 Webhook
    Show,
}

#[derive(Subcommand)]
enum ForwardingState {
    On,
    Off,
}

fn open_store(config: &Config) -> Result<Arc<SettingsStore>> {
    let path = config.settings_path()?;
    debug!(path = %path.display(), "Opening settings");
    Ok(Arc::new(SettingsStore::open(path)?))
}

fn print_pdu(hex: &str, format: Option<&str>) -> Result<()> {
    let sms = pdu::decode_hex_pdu(hex, format)?;
    println!("From:     {}", sms.originating_address);
    println!("Body:     {}", sms.body);
    println!("Alphabet: {:?}", sms.alphabet);
    if let Some(t) = sms.service_center_time {
        println!("Sent at:  {}", t.to_rfc3339());
    }
    if let Some(c) = sms.concat {
        println!("Part:     {}/{} (ref {})", c.sequence, c.total, c.reference);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，默认 info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("routesms=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    match cli.command {
        Commands::Run(args) => {
            handle_run(&config, open_store(&config)?, args).await?;
        }
        Commands::SendTest => {
            let outcome = handle_send_test(&config, open_store(&config)?).await?;
            match outcome {
                ForwardOutcome::Delivered => println!("✓ Test message sent"),
                other => anyhow::bail!("Test message not delivered: {:?}", other),
            }
        }
        Commands::Webhook { action } => match action {
            WebhookAction::Set { url } => {
                open_store(&config)?.save_webhook_url(&url)?;
                println!("✓ Webhook saved");
            }
            WebhookAction::Show => {
                let url = open_store(&config)?.webhook_url();
                if url.is_empty() {
                    println!("Webhook not set");
                } else {
                    println!("{}", url);
                }
            }
        },
        Commands::Forwarding { state } => {
            let enabled = matches!(state, ForwardingState::On);
            open_store(&config)?.set_forwarding_enabled(enabled)?;
            println!("✓ Forwarding {}", if enabled { "on" } else { "off" });
        }
        Commands::Filters { action } => {
            let store = open_store(&config)?;
            handle_filters(&store, action)?;
        }
        Commands::History { json, limit } => {
            let log = MessageLog::init(open_store(&config)?);
            let mut messages = log.snapshot();
            if let Some(limit) = limit {
                messages.truncate(limit);
            }
            if json {
                println!("{}", to_json(&messages));
            } else if messages.is_empty() {
                println!("No messages yet");
            } else {
                for msg in &messages {
                    println!("{}", format_message(msg));
                }
            }
        }
        Commands::Stats { json } => {
            let stats = Stats::from(&open_store(&config)?.snapshot());
            if json {
                println!("{}", to_json(&stats));
            } else {
                println!("{}", format_stats(&stats));
            }
        }
        Commands::ResetDaily => {
            open_store(&config)?.reset_daily_count(Local::now().date_naive())?;
            println!("✓ Daily count reset");
        }
        Commands::DecodePdu { hex, format } => {
            print_pdu(&hex, format.as_deref())?;
        }
    }

    Ok(())
}
