//! Fixed-window rate limiting.
//!
//! Requests are counted per `(identity, endpoint)` key within fixed windows.
//! The counting backend sits behind [`RateLimitStore`]: a single gateway
//! process uses the in-memory store, a fleet shares counters through Redis.
//!
//! Enforcement fails open. When the store is unreachable the request is
//! allowed and the outage is logged; the gateway does not turn a counter
//! backend incident into a platform outage.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

pub use self::redis::RedisStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    Store(String),
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per key per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Post-increment counter state for one key's current window.
#[derive(Debug, Clone)]
pub struct WindowCount {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

/// Counter backend contract.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically bump `key` within its current window, creating the window
    /// with `window` expiry when absent or expired. Returns the
    /// post-increment count and the window deadline.
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, RateLimitError>;
}

/// Outcome of a rate-limit check, carrying everything the response headers
/// need.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up and never below
    /// one, for `retryAfter` and the `retry-after` header.
    pub fn retry_after_secs(&self) -> i64 {
        let remaining_ms = (self.reset_at - Utc::now()).num_milliseconds();
        ((remaining_ms + 999) / 1000).max(1)
    }
}

/// Policy front over a counter store.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

// The store is a trait object without a Debug bound, so the derive is not
// available.
impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count this request against `(identity, endpoint)` and decide whether
    /// it may proceed.
    pub async fn check(&self, identity: &str, endpoint: &str) -> RateLimitDecision {
        let limit = self.config.max_requests;
        let key = format!("ratelimit:{identity}:{endpoint}");
        match self.store.incr(&key, self.config.window).await {
            Ok(window) => RateLimitDecision {
                allowed: window.count <= u64::from(limit),
                limit,
                remaining: u64::from(limit).saturating_sub(window.count) as u32,
                reset_at: window.reset_at,
            },
            Err(err) => {
                warn!(error = %err, "rate limit store unavailable, allowing request");
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_at: Utc::now() + self.config.window,
                }
            }
        }
    }
}
