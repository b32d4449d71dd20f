//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;

use super::{RateLimitError, RateLimitStore, WindowCount};

/// Store backed by a shared Redis, for fleets of gateway instances.
///
/// Counting is plain INCR with EXPIRE set on the window's first hit, the
/// same scheme as the memory store but atomic across processes. The TTL
/// gap between INCR and EXPIRE is one round trip; for fixed windows of
/// seconds that drift does not matter.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

// ConnectionManager has no Debug impl, so the derive is not available.
impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url`, e.g. `redis://gateway-redis:6379`. The connection
    /// manager reconnects by itself after broken connections.
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        Ok(Self { conn })
    }
}

fn store_err(err: redis::RedisError) -> RateLimitError {
    RateLimitError::Store(err.to_string())
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError> {
        let mut conn = self.conn.clone();
        let window_secs = window.as_secs().max(1);

        let count: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        if count == 1 {
            let _: i64 = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
        }

        let ttl: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        // TTL of -1 means the EXPIRE was lost (crash between the two
        // commands); reapply it so the key cannot count forever.
        let ttl = if ttl < 0 {
            let _: i64 = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            window_secs as i64
        } else {
            ttl
        };

        Ok(WindowCount {
            count,
            reset_at: Utc::now() + Duration::from_secs(ttl as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_a_store_error() {
        let err = RedisStore::connect("not-a-redis-url").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Store(_)));
    }
}
