//! run / send-test 命令 - 启动流水线

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{stdin, BufReader};
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::Config;
use crate::ingest::MemoryMmsStore;
use crate::pipeline::{ForwardOutcome, Pipeline, PipelineOptions};
use crate::settings::SettingsStore;
use crate::slack::SlackWebhookClient;

/// run 命令参数
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// 启动前加载的彩信 provider 快照（JSON）
    #[arg(long)]
    pub mms_snapshot: Option<PathBuf>,
}

fn start_pipeline(config: &Config, store: Arc<SettingsStore>) -> Result<Pipeline> {
    let client = SlackWebhookClient::new(config.webhook_config())?;
    Ok(Pipeline::start(
        store,
        Arc::new(client),
        PipelineOptions::from(config),
    ))
}

/// 处理 run 命令：从 stdin 读取桥接事件，直到 EOF 或 Ctrl-C
pub async fn handle_run(config: &Config, store: Arc<SettingsStore>, args: RunArgs) -> Result<()> {
    if store.webhook_url().trim().is_empty() {
        warn!("Webhook URL is not set, deliveries will fail until `routesms webhook set` is run");
    }

    let pipeline = start_pipeline(config, store)?;
    let mms_store = Arc::new(MemoryMmsStore::new());
    if let Some(path) = &args.mms_snapshot {
        mms_store.load_json(path)?;
    }
    let bridge = Bridge::with_mms_store(&pipeline, mms_store);

    info!("Reading bridge events from stdin");
    tokio::select! {
        result = bridge.run(BufReader::new(stdin())) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    pipeline.shutdown().await;
    Ok(())
}

/// 处理 send-test 命令
pub async fn handle_send_test(config: &Config, store: Arc<SettingsStore>) -> Result<ForwardOutcome> {
    let pipeline = start_pipeline(config, store)?;
    let outcome = pipeline.send_test().await;
    pipeline.shutdown().await;
    Ok(outcome)
}
