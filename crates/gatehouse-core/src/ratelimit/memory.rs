//! In-process counter store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{RateLimitError, RateLimitStore, WindowCount};

#[derive(Debug)]
struct WindowSlot {
    count: u64,
    expires_at: Instant,
    reset_at: DateTime<Utc>,
}

impl WindowSlot {
    fn fresh(window: Duration) -> Self {
        Self {
            count: 0,
            expires_at: Instant::now() + window,
            reset_at: Utc::now() + window,
        }
    }
}

/// DashMap-backed store for single-process deployments.
///
/// Expired windows are replaced lazily on the next hit for their key; the
/// periodic sweep drops windows no request touches anymore so idle keys do
/// not accumulate for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, WindowSlot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Number of tracked keys, expired-but-unswept ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every expired window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.expires_at > now);
        let removed = before - self.slots.len();
        if removed > 0 {
            debug!(removed, "swept expired rate limit windows");
        }
    }

    /// Sweep on a fixed interval until the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| WindowSlot::fresh(window));
        if slot.expires_at <= Instant::now() {
            *slot = WindowSlot::fresh(window);
        }
        slot.count += 1;
        Ok(WindowCount {
            count: slot.count,
            reset_at: slot.reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_increase_within_a_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        for expected in 1..=5u64 {
            let count = store.incr("k", window).await.unwrap();
            assert_eq!(count.count, expected);
        }
    }

    #[tokio::test]
    async fn expired_window_restarts_the_count() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(40);

        assert_eq!(store.incr("k", window).await.unwrap().count, 1);
        assert_eq!(store.incr("k", window).await.unwrap().count, 2);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(store.incr("k", window).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn keys_do_not_interfere() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        store.incr("a", window).await.unwrap();
        store.incr("a", window).await.unwrap();
        assert_eq!(store.incr("b", window).await.unwrap().count, 1);
    }

    #[test]
    fn sweep_drops_only_expired_windows() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.incr("stale", Duration::from_millis(20)).await.unwrap();
            store.incr("live", Duration::from_secs(60)).await.unwrap();
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(store.len(), 2);
        store.sweep();
        assert_eq!(store.len(), 1);
    }
}
