//! 设置存储 - 本地 JSON 文件读写，变更通过 watch channel 广播
//!
//! 所有字段都只会被覆盖，不会被删除。文件损坏或缺失时回退到默认值。

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

/// 持久化的设置项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Webhook 路径（或完整 URL）
    #[serde(rename = "api_url")]
    pub webhook_url: String,
    /// 序列化的过滤规则数组
    pub filter_rules_json: String,
    /// 当日已转发数
    pub daily_message_count: u32,
    /// 当日计数的日期（YYYY-MM-DD）
    pub last_count_reset_date: String,
    /// 累计转发数
    pub forwarded_total_count: u32,
    /// 转发总开关
    pub forwarding_enabled: bool,
    /// 序列化的消息历史数组
    pub message_history_json: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            filter_rules_json: "[]".to_string(),
            daily_message_count: 0,
            last_count_reset_date: String::new(),
            forwarded_total_count: 0,
            forwarding_enabled: true,
            message_history_json: "[]".to_string(),
        }
    }
}

/// 设置存储
pub struct SettingsStore {
    /// 文件路径；`None` 表示仅内存（测试用）
    path: Option<PathBuf>,
    /// 串行化写入
    write_lock: Mutex<()>,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// 打开（或创建）设置文件
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let settings = Self::load_file(&path);
        let (tx, _) = watch::channel(settings);
        Ok(Self {
            path: Some(path),
            write_lock: Mutex::new(()),
            tx,
        })
    }

    /// 仅内存的设置存储
    pub fn in_memory() -> Self {
        Self::with_settings(Settings::default())
    }

    /// 以指定初始值创建内存存储
    pub fn with_settings(settings: Settings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self {
            path: None,
            write_lock: Mutex::new(()),
            tx,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load_file(path: &Path) -> Settings {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Settings::default(),
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed settings file, using defaults");
                Settings::default()
            }
        }
    }

    /// 当前设置快照
    pub fn snapshot(&self) -> Settings {
        self.tx.borrow().clone()
    }

    /// 订阅设置变更
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// 重新读取设置文件，其他进程（如 CLI）的修改在此生效
    pub fn refresh(&self) -> Settings {
        if let Some(path) = &self.path {
            if path.exists() {
                let on_disk = Self::load_file(path);
                self.tx.send_if_modified(|current| {
                    if *current == on_disk {
                        return false;
                    }
                    debug!(path = %path.display(), "Settings changed on disk");
                    *current = on_disk;
                    true
                });
            }
        }
        self.snapshot()
    }

    /// 修改设置并落盘
    ///
    /// 文件锁内重新读取文件再修改，不会覆盖其他进程的写入。
    pub fn update<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let next = match &self.path {
            Some(path) => Self::with_locked_file(path, f)?,
            None => {
                let mut next = self.snapshot();
                f(&mut next);
                next
            }
        };
        self.tx.send_replace(next.clone());
        Ok(next)
    }

    /// 在文件锁保护下执行 settings.json 的读-改-写
    fn with_locked_file<F>(path: &Path, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        use fs2::FileExt;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path.with_extension("lock"))?;
        lock_file.lock_exclusive()?;

        let result = (|| {
            let mut settings = Self::load_file(path);
            f(&mut settings);
            Self::write_file(path, &settings)?;
            Ok(settings)
        })();

        let _ = lock_file.unlock();
        result
    }

    fn write_file(path: &Path, settings: &Settings) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(serde_json::to_string_pretty(settings)?.as_bytes())?;
            temp.sync_all()?;
        }
        // 原子替换
        fs::rename(&temp_path, path)?;
        debug!(path = %path.display(), "Settings saved");
        Ok(())
    }

    // ==================== Webhook ====================

    pub fn webhook_url(&self) -> String {
        self.refresh().webhook_url
    }

    pub fn save_webhook_url(&self, url: &str) -> Result<()> {
        let url = url.trim().to_string();
        self.update(|s| s.webhook_url = url)?;
        Ok(())
    }

    // ==================== 转发开关 ====================

    pub fn forwarding_enabled(&self) -> bool {
        self.refresh().forwarding_enabled
    }

    pub fn set_forwarding_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.forwarding_enabled = enabled)?;
        Ok(())
    }

    // ==================== 计数器 ====================

    pub fn daily_message_count(&self) -> u32 {
        self.refresh().daily_message_count
    }

    pub fn forwarded_total_count(&self) -> u32 {
        self.refresh().forwarded_total_count
    }

    /// 记录一次成功转发：日期变化时先清零当日计数
    pub fn record_forwarded(&self, today: NaiveDate) -> Result<()> {
        let today = today.format("%Y-%m-%d").to_string();
        self.update(|s| {
            if s.last_count_reset_date != today {
                s.daily_message_count = 0;
                s.last_count_reset_date = today;
            }
            s.daily_message_count = s.daily_message_count.saturating_add(1);
            s.forwarded_total_count = s.forwarded_total_count.saturating_add(1);
        })?;
        Ok(())
    }

    /// 清零当日计数
    pub fn reset_daily_count(&self, today: NaiveDate) -> Result<()> {
        let today = today.format("%Y-%m-%d").to_string();
        self.update(|s| {
            s.daily_message_count = 0;
            s.last_count_reset_date = today;
        })?;
        Ok(())
    }

    // ==================== 序列化集合 ====================

    pub fn filter_rules_json(&self) -> String {
        self.refresh().filter_rules_json
    }

    pub fn save_filter_rules_json(&self, json: String) -> Result<()> {
        self.update(|s| s.filter_rules_json = json)?;
        Ok(())
    }

    pub fn message_history_json(&self) -> String {
        self.tx.borrow().message_history_json.clone()
    }

    pub fn save_message_history_json(&self, json: String) -> Result<()> {
        self.update(|s| s.message_history_json = json)?;
        Ok(())
    }
}
