//! Shared state wired at startup.
//!
//! [`build`] turns the parsed configuration into the registry, rate limiter,
//! and upstream HTTP client the handlers share, plus the health checker the
//! binary spawns. Everything is constructed once; handlers only clone `Arc`s.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gatehouse_config::GatewayConfig;
use gatehouse_core::{
    BreakerConfig, HealthCheckConfig, HealthChecker, MemoryStore, RateLimitConfig, RateLimitStore,
    RateLimiter, RedisStore, ServiceDescriptor, ServiceName, ServiceRegistry,
};
use tracing::info;

use crate::error::{GatewayError, Result};

#[derive(Clone, Debug)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub limiter: Arc<RateLimiter>,
    /// Client for proxied requests. Deliberately without a client-level
    /// timeout; the per-request soft timeout carries it instead.
    pub http: reqwest::Client,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    /// Most bytes the proxy will buffer from one request body, from
    /// `server.body_limit_mb`. Larger bodies are rejected with a 413 before
    /// any upstream traffic.
    pub body_limit: usize,
    /// Set in development deployments only. Gates upstream failure causes in
    /// error envelopes.
    pub expose_error_detail: bool,
    /// Process start, for the uptime reported on `/health`.
    pub started_at: Instant,
}

/// Build the shared state and the (not yet spawned) health checker from
/// configuration.
pub async fn build(config: &GatewayConfig) -> Result<(AppState, HealthChecker)> {
    let descriptors = service_descriptors(config)?;
    let breaker_config = BreakerConfig {
        failure_threshold: config.circuit_breaker.failure_threshold,
        recovery_timeout: Duration::from_secs(config.circuit_breaker.recovery_timeout_secs),
        monitoring_period: Duration::from_secs(config.circuit_breaker.monitoring_period_secs),
    };
    let registry = Arc::new(ServiceRegistry::new(descriptors, breaker_config)?);

    let limiter = Arc::new(build_limiter(config).await?);

    let checker = HealthChecker::new(
        Arc::clone(&registry),
        HealthCheckConfig {
            interval: Duration::from_secs(config.health_check.interval_secs),
            probe_timeout: Duration::from_secs(config.health_check.probe_timeout_secs),
            path: config.health_check.path.clone(),
        },
    )?;

    let http = reqwest::Client::builder()
        .build()
        .map_err(GatewayError::Client)?;

    let state = AppState {
        registry,
        limiter,
        http,
        soft_timeout: Duration::from_secs(config.proxy.soft_timeout_secs),
        hard_timeout: Duration::from_secs(config.proxy.hard_timeout_secs),
        body_limit: config.server.body_limit_mb * 1024 * 1024,
        expose_error_detail: config.server.is_development(),
        started_at: Instant::now(),
    };
    Ok((state, checker))
}

fn service_descriptors(config: &GatewayConfig) -> Result<Vec<ServiceDescriptor>> {
    if config.services.is_empty() {
        return Err(GatewayError::Config("no services configured".to_string()));
    }
    let mut descriptors = Vec::with_capacity(config.services.len());
    for (key, service) in &config.services {
        let name: ServiceName = key
            .parse()
            .map_err(|err| GatewayError::Config(format!("[services.{key}]: {err}")))?;
        let mut descriptor = ServiceDescriptor::with_instances(name, service.urls.clone());
        descriptor.timeout = Duration::from_millis(service.timeout_ms);
        descriptor.retries = service.retries;
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

async fn build_limiter(config: &GatewayConfig) -> Result<RateLimiter> {
    let limit_config = RateLimitConfig {
        max_requests: config.rate_limit.max_requests,
        window: Duration::from_secs(config.rate_limit.window_secs),
    };
    let store: Arc<dyn RateLimitStore> = match &config.rate_limit.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            info!("rate limiting backed by redis");
            Arc::new(store)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let _ = store.spawn_sweeper(Duration::from_secs(
                config.rate_limit.sweep_interval_secs.max(1),
            ));
            info!("rate limiting with in-process counters");
            store
        }
    };
    Ok(RateLimiter::new(store, limit_config))
}
