//! 后台任务：定期清理过期的 CSRF 令牌缓存。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::CSRF_PRUNE_INTERVAL_SECS;
use crate::csrf::CsrfTokenCache;
use crate::gate::Gate;

/// 未启用 CSRF 时不启动任何任务。
pub fn spawn_background_tasks(gate: Arc<Gate>) {
    if gate.issuer().csrf_cache().is_none() {
        return;
    }

    tokio::spawn(prune_csrf_tokens_forever(gate));
}

async fn prune_csrf_tokens_forever(gate: Arc<Gate>) {
    let mut interval = tokio::time::interval(Duration::from_secs(CSRF_PRUNE_INTERVAL_SECS));
    loop {
        interval.tick().await;
        if let Some(cache) = gate.issuer().csrf_cache() {
            prune_csrf_tokens(cache).await;
        }
    }
}

async fn prune_csrf_tokens(cache: &CsrfTokenCache) -> usize {
    let pruned = cache.prune_expired().await;
    if pruned > 0 {
        // 日志宏内部不能跨 await 持有引用，否则任务不是 Send。
        let remaining = cache.len().await;
        debug!(pruned, remaining, "pruned csrf tokens");
    }
    pruned
}
