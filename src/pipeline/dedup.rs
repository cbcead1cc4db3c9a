//! 消息去重缓存 - 防止同一条消息被多个来源重复转发
//!
//! 同一条物理消息可能经由 SMS 广播、MMS 轮询和通知监听三条路径先后到达，
//! 且到达顺序和延迟都不固定，因此使用三个独立的键空间：
//! 1. sender + content 组合（哈希）
//! 2. 仅 sender（MMS 正文在广播和通知里可能读出不同内容）
//! 3. 仅 content（通知的 sender 可能是联系人名称而非号码）
//!
//! 所有记录在 TTL 后失效，每次访问时惰性清理，进程退出即丢弃。

use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::trace;

/// 默认去重窗口
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

type KeySpace = Mutex<HashMap<String, Instant>>;

/// 去重缓存（可跨任务共享，内部按键空间分锁）
pub struct DedupCache {
    /// sender+content 哈希 -> 最后登记时间
    content_cache: KeySpace,
    /// 规范化 sender -> 最后登记时间
    sender_cache: KeySpace,
    /// 规范化 content -> 最后登记时间
    content_only_cache: KeySpace,
    ttl: Duration,
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            content_cache: Mutex::new(HashMap::new()),
            sender_cache: Mutex::new(HashMap::new()),
            content_only_cache: Mutex::new(HashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }

    /// 设置去重窗口时长
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// sender+content 是否在窗口内登记过
    pub fn is_duplicate(&self, sender: &str, content: &str) -> bool {
        let now = Instant::now();
        self.clean_expired(now);
        let key = build_content_key(sender, content);
        self.hit(&self.content_cache, &key, now)
    }

    /// 仅按 sender 判断（忽略 content）
    pub fn is_duplicate_by_sender(&self, sender: &str) -> bool {
        let now = Instant::now();
        self.clean_expired(now);
        let key = normalize_sender(sender);
        if key.is_empty() {
            return false;
        }
        self.hit(&self.sender_cache, &key, now)
    }

    /// 仅按 content 判断（忽略 sender）
    pub fn is_duplicate_by_content(&self, content: &str) -> bool {
        let now = Instant::now();
        self.clean_expired(now);
        let key = normalize_content(content);
        if key.is_empty() {
            return false;
        }
        self.hit(&self.content_only_cache, &key, now)
    }

    /// 登记到全部三个键空间（SMS/MMS 路径使用）
    pub fn register(&self, sender: &str, content: &str) {
        let now = Instant::now();
        self.clean_expired(now);

        lock(&self.content_cache).insert(build_content_key(sender, content), now);
        let sender_key = normalize_sender(sender);
        if !sender_key.is_empty() {
            lock(&self.sender_cache).insert(sender_key, now);
        }
        lock(&self.content_only_cache).insert(normalize_content(content), now);
        trace!(sender = %sender, "Registered message in all key spaces");
    }

    /// 只登记 sender+content 和 content 键空间（通知兜底路径使用）
    ///
    /// 不登记 sender 键：否则同一发送者紧接着的另一条消息会被误判为重复。
    pub fn register_content(&self, sender: &str, content: &str) {
        let now = Instant::now();
        self.clean_expired(now);

        lock(&self.content_cache).insert(build_content_key(sender, content), now);
        lock(&self.content_only_cache).insert(normalize_content(content), now);
        trace!(sender = %sender, "Registered message content keys");
    }

    /// 三个键空间的有效记录总数
    pub fn len(&self) -> usize {
        self.clean_expired(Instant::now());
        lock(&self.content_cache).len()
            + lock(&self.sender_cache).len()
            + lock(&self.content_only_cache).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hit(&self, space: &KeySpace, key: &str, now: Instant) -> bool {
        lock(space)
            .get(key)
            .map(|seen| now.duration_since(*seen) < self.ttl)
            .unwrap_or(false)
    }

    /// 清理过期记录
    fn clean_expired(&self, now: Instant) {
        for space in [&self.content_cache, &self.sender_cache, &self.content_only_cache] {
            lock(space).retain(|_, seen| now.duration_since(*seen) < self.ttl);
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

// 缓存中只有时间戳，锁中毒时数据依然可用
fn lock(space: &KeySpace) -> MutexGuard<'_, HashMap<String, Instant>> {
    space.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn non_phone_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9+]").expect("static regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// 号码规范化：只保留数字和 `+`
pub fn normalize_sender(sender: &str) -> String {
    non_phone_chars().replace_all(sender, "").into_owned()
}

/// 内容规范化：去首尾空白，连续空白折叠为一个空格
pub fn normalize_content(content: &str) -> String {
    whitespace_runs().replace_all(content.trim(), " ").into_owned()
}

fn build_content_key(sender: &str, content: &str) -> String {
    let combined = format!("{}:{}", normalize_sender(sender), normalize_content(content));
    let mut hasher = DefaultHasher::new();
    combined.hash(&mut hasher);
    hasher.finish().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    #[test]
    fn test_register_twice_still_duplicate() {
        let cache = DedupCache::new();
        cache.register("+821012345678", "hello");
        cache.register("+821012345678", "hello");
        assert!(cache.is_duplicate("+821012345678", "hello"));
    }

    #[test]
    fn test_ttl_expiry_allows_again() {
        let cache = DedupCache::new().with_ttl(Duration::from_millis(80));
        cache.register("010", "hello");
        assert!(cache.is_duplicate("010", "hello"));

        sleep(Duration::from_millis(150));

        assert!(!cache.is_duplicate("010", "hello"));
        assert!(!cache.is_duplicate_by_sender("010"));
        assert!(!cache.is_duplicate_by_content("hello"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sender_normalization_collapses_punctuation() {
        let cache = DedupCache::new();
        cache.register("010-1234-5678", "body");
        assert!(cache.is_duplicate_by_sender("01012345678"));
        assert!(cache.is_duplicate_by_sender("(010) 1234 5678"));
        assert!(!cache.is_duplicate_by_sender("01099998888"));
    }

    #[test]
    fn test_content_normalization_collapses_whitespace() {
        let cache = DedupCache::new();
        cache.register("Mom", "  see   you\n soon ");
        assert!(cache.is_duplicate_by_content("see you soon"));
        assert!(cache.is_duplicate("Mom", "see you soon"));
    }

    #[test]
    fn test_register_content_skips_sender_key() {
        let cache = DedupCache::new();
        cache.register_content("01012345678", "first");
        assert!(cache.is_duplicate("01012345678", "first"));
        assert!(cache.is_duplicate_by_content("first"));
        assert!(!cache.is_duplicate_by_sender("01012345678"));
    }

    #[test]
    fn test_display_name_sender_is_never_sender_duplicate() {
        // 联系人名称规范化后为空，不能命中 sender 键空间
        let cache = DedupCache::new();
        cache.register("Alice", "hi");
        assert!(!cache.is_duplicate_by_sender("Bob"));
        assert!(cache.is_duplicate_by_content("hi"));
    }

    #[test]
    fn test_different_content_not_duplicate() {
        let cache = DedupCache::new();
        cache.register("010", "A");
        assert!(!cache.is_duplicate("010", "B"));
        assert!(!cache.is_duplicate_by_content("B"));
    }

    #[test]
    fn test_concurrent_register_and_check() {
        let cache = Arc::new(DedupCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let sender = format!("010{}", i);
                        let content = format!("msg-{}-{}", i, j);
                        cache.register(&sender, &content);
                        assert!(cache.is_duplicate(&sender, &content));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.is_duplicate_by_sender("0107"));
    }

    #[test]
    fn test_default_ttl_is_ten_seconds() {
        assert_eq!(DedupCache::new().ttl(), Duration::from_secs(10));
    }
}
