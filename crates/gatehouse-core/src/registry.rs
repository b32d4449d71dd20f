//! Service registry.
//!
//! The registry is built once at startup from configuration and owns the
//! per-service circuit breakers, health state, and round-robin cursors. It is
//! an explicit value passed to whoever needs it; nothing here is global.
//!
//! Health flags are written by the background checker, breaker counters by
//! whoever observed the upstream outcome (the proxy after a forward, the
//! checker after a probe). Reads happen on every request, so health state
//! sits behind a read-write lock and the instance cursor is a plain atomic.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::correlation::{CorrelationId, CORRELATION_HEADER};
use crate::service::{ServiceDescriptor, ServiceHealth, ServiceName};

const RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service {0} is not registered")]
    NotRegistered(ServiceName),
    #[error("service {0} is unavailable")]
    Unavailable(ServiceName),
    #[error("service {0} has no instances configured")]
    NoInstances(ServiceName),
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug)]
struct HealthState {
    /// Instance targeted by the most recent probe.
    url: String,
    healthy: bool,
    last_checked_at: Option<DateTime<Utc>>,
    last_response_time_ms: Option<u64>,
    consecutive_error_count: u32,
}

#[derive(Debug)]
struct ServiceEntry {
    descriptor: ServiceDescriptor,
    breaker: CircuitBreaker,
    health: RwLock<HealthState>,
    cursor: AtomicUsize,
}

impl ServiceEntry {
    /// Advance the shared round-robin cursor and return the selected
    /// instance. Probes and proxied requests both go through here, so every
    /// instance gets traffic and probes eventually.
    fn next_instance(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.descriptor.instances.len();
        &self.descriptor.instances[idx]
    }

    /// A service takes traffic only when the checker considers it healthy
    /// and its breaker is not blocking. The breaker query comes first and
    /// unconditionally so the lazy open-to-half-open transition fires even
    /// while the health flag is still down.
    fn available(&self) -> bool {
        let circuit_open = self.breaker.is_open();
        let healthy = self.health.read().healthy;
        healthy && !circuit_open
    }
}

/// Immutable map of logical services, shared via `Arc` between the axum
/// state, the proxy, and the health checker.
#[derive(Debug)]
pub struct ServiceRegistry {
    services: HashMap<ServiceName, Arc<ServiceEntry>>,
    http: reqwest::Client,
}

impl ServiceRegistry {
    /// Build the registry. Services start unhealthy until the first probe
    /// round marks them up, so the checker should run a round immediately
    /// after startup.
    pub fn new(
        descriptors: Vec<ServiceDescriptor>,
        breaker_config: BreakerConfig,
    ) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder().build()?;
        let mut services = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if descriptor.instances.is_empty() {
                return Err(RegistryError::NoInstances(descriptor.name));
            }
            let name = descriptor.name;
            services.insert(
                name,
                Arc::new(ServiceEntry {
                    breaker: CircuitBreaker::new(name.as_str(), breaker_config.clone()),
                    health: RwLock::new(HealthState {
                        url: descriptor.instances[0].clone(),
                        healthy: false,
                        last_checked_at: None,
                        last_response_time_ms: None,
                        consecutive_error_count: 0,
                    }),
                    cursor: AtomicUsize::new(0),
                    descriptor,
                }),
            );
        }
        Ok(Self { services, http })
    }

    fn entry(&self, name: ServiceName) -> Option<&Arc<ServiceEntry>> {
        self.services.get(&name)
    }

    /// Registered service names, sorted for stable output.
    pub fn service_names(&self) -> Vec<ServiceName> {
        let mut names: Vec<_> = self.services.keys().copied().collect();
        names.sort();
        names
    }

    pub fn descriptor(&self, name: ServiceName) -> Option<&ServiceDescriptor> {
        self.entry(name).map(|entry| &entry.descriptor)
    }

    pub fn breaker(&self, name: ServiceName) -> Option<&CircuitBreaker> {
        self.entry(name).map(|entry| &entry.breaker)
    }

    /// Resolve the base URL for the next request to `name`.
    ///
    /// Fails when the service is not registered, marked unhealthy, or its
    /// breaker is open. Does not touch health state; the breaker's lazy
    /// recovery transition is the only state this call can move.
    pub fn service_url(&self, name: ServiceName) -> Result<String, RegistryError> {
        let entry = self
            .entry(name)
            .ok_or(RegistryError::NotRegistered(name))?;
        if !entry.available() {
            return Err(RegistryError::Unavailable(name));
        }
        Ok(entry.next_instance().to_string())
    }

    pub fn is_healthy(&self, name: ServiceName) -> bool {
        self.entry(name).map(|entry| entry.available()).unwrap_or(false)
    }

    /// Names of all services currently able to take traffic.
    pub fn healthy_services(&self) -> Vec<ServiceName> {
        let mut names: Vec<_> = self
            .services
            .iter()
            .filter(|(_, entry)| entry.available())
            .map(|(name, _)| *name)
            .collect();
        names.sort();
        names
    }

    /// Health snapshot for one service. Pure read: reports the breaker state
    /// as-is without driving its recovery transition.
    pub fn health(&self, name: ServiceName) -> Option<ServiceHealth> {
        self.entry(name).map(|entry| Self::snapshot_entry(entry))
    }

    /// Health snapshot for every registered service, keyed in name order.
    pub fn health_snapshot(&self) -> BTreeMap<ServiceName, ServiceHealth> {
        self.services
            .iter()
            .map(|(name, entry)| (*name, Self::snapshot_entry(entry)))
            .collect()
    }

    fn snapshot_entry(entry: &ServiceEntry) -> ServiceHealth {
        let health = entry.health.read();
        ServiceHealth {
            url: health.url.clone(),
            healthy: health.healthy,
            last_checked_at: health.last_checked_at,
            last_response_time_ms: health.last_response_time_ms,
            consecutive_error_count: health.consecutive_error_count,
            circuit_breaker_open: entry.breaker.state() == BreakerState::Open,
        }
    }

    /// HTTP client bound to a healthy instance of `name`, or `None` when the
    /// service cannot take traffic right now.
    pub fn client(&self, name: ServiceName) -> Option<ServiceClient> {
        let entry = self.entry(name)?;
        if !entry.available() {
            return None;
        }
        Some(ServiceClient {
            service: name,
            base_url: entry.next_instance().to_string(),
            timeout: entry.descriptor.timeout,
            correlation_id: None,
            http: self.http.clone(),
        })
    }

    /// Record a successful interaction with `name`, decaying its breaker.
    pub fn record_success(&self, name: ServiceName) {
        if let Some(entry) = self.entry(name) {
            entry.breaker.record_success();
        }
    }

    /// Record a failed interaction with `name`.
    ///
    /// Feeds the breaker only. The health snapshot belongs to the background
    /// checker; a burst of proxy failures shows up there indirectly, once the
    /// breaker opens.
    pub fn record_failure(&self, name: ServiceName) {
        if let Some(entry) = self.entry(name) {
            entry.breaker.record_failure();
        }
    }

    /// Instance to probe next, bypassing the availability gate so down
    /// services still get probed.
    pub(crate) fn probe_target(&self, name: ServiceName) -> Option<String> {
        self.entry(name).map(|entry| entry.next_instance().to_string())
    }

    pub(crate) fn apply_probe_success(&self, name: ServiceName, url: &str, elapsed: Duration) {
        if let Some(entry) = self.entry(name) {
            {
                let mut health = entry.health.write();
                health.url = url.to_string();
                health.healthy = true;
                health.last_checked_at = Some(Utc::now());
                health.last_response_time_ms = Some(elapsed.as_millis() as u64);
                health.consecutive_error_count = 0;
            }
            entry.breaker.record_success();
        }
    }

    pub(crate) fn apply_probe_failure(&self, name: ServiceName, url: &str) {
        if let Some(entry) = self.entry(name) {
            {
                let mut health = entry.health.write();
                health.url = url.to_string();
                health.healthy = false;
                health.last_checked_at = Some(Utc::now());
                health.consecutive_error_count += 1;
            }
            entry.breaker.record_failure();
        }
    }

    /// Run `op` with exponential backoff: after a failed attempt the delay is
    /// `2^attempt` seconds, up to the service's configured retry budget. The
    /// final error is returned unchanged. Outcome recording stays with the
    /// caller.
    pub async fn retry_request<T, E, F, Fut>(&self, name: ServiceName, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let retries = self
            .entry(name)
            .map(|entry| entry.descriptor.retries)
            .unwrap_or(0);
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < retries => {
                    let delay =
                        Duration::from_millis(RETRY_BASE_DELAY_MS << attempt.min(16));
                    warn!(
                        service = %name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// HTTP client pinned to one instance of one service.
///
/// Carries the service timeout and, when set, the correlation id onto every
/// request it builds. Obtained from [`ServiceRegistry::client`], which only
/// hands one out while the service is available.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    service: ServiceName,
    base_url: String,
    timeout: Duration,
    correlation_id: Option<CorrelationId>,
    http: reqwest::Client,
}

impl ServiceClient {
    pub fn service(&self) -> ServiceName {
        self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    /// Build a request with the service timeout and a correlation id header.
    /// A fresh id is minted when none was attached, so internal calls always
    /// trace.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let id = self.correlation_id.clone().unwrap_or_default();
        self.http
            .request(method, self.url(path))
            .timeout(self.timeout)
            .header(CORRELATION_HEADER, id.as_str())
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}
