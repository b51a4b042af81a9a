//! 签发方 CSRF 令牌的短期缓存。
//!
//! 缓存由签发方客户端持有，按会话（刷新凭证）分键，提供显式失效接口。

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// 一次 CSRF 获取的结果：令牌及签发方随之下发的 Cookie 对。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfToken {
    pub token: String,
    pub cookies: Vec<(String, String)>,
}

#[derive(Debug)]
struct CsrfEntry {
    token: CsrfToken,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct CsrfTokenCache {
    entries: Mutex<HashMap<String, CsrfEntry>>,
    ttl: Duration,
}

impl CsrfTokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// 命中且未过期时返回令牌；过期条目顺带移除。
    pub async fn get(&self, key: &str) -> Option<CsrfToken> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.token.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: &str, token: CsrfToken) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CsrfEntry {
                token,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// 签发方拒绝令牌后调用。
    pub async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
    }

    /// 丢弃全部令牌；签发方声明 CSRF 校验失败时调用。
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// 清理过期条目。
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
