//! Background health probing.
//!
//! One checker task probes every registered service on a fixed interval.
//! Probes within a round run concurrently so one slow upstream cannot stall
//! the others, and each probe carries its own timeout. Services whose
//! breaker is open are not probed; once the breaker's recovery timeout
//! elapses, the skip check itself moves it to half-open and the next round's
//! probe becomes the trial request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{RegistryError, ServiceRegistry};
use crate::service::ServiceName;

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Time between probe rounds.
    pub interval: Duration,
    /// Budget for a single probe, connect included.
    pub probe_timeout: Duration,
    /// Path probed on each service instance.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            path: "/health".to_string(),
        }
    }
}

/// Periodic prober feeding the registry's health flags and breakers.
#[derive(Debug)]
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    config: HealthCheckConfig,
    http: reqwest::Client,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        config: HealthCheckConfig,
    ) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()?;
        Ok(Self {
            registry,
            config,
            http,
        })
    }

    /// Probe every registered service once, concurrently.
    pub async fn run_round(&self) {
        let names = self.registry.service_names();
        join_all(names.into_iter().map(|name| self.probe(name))).await;
    }

    async fn probe(&self, name: ServiceName) {
        if let Some(breaker) = self.registry.breaker(name) {
            if breaker.is_open() {
                debug!(service = %name, "circuit open, skipping probe");
                return;
            }
        }
        let Some(base) = self.registry.probe_target(name) else {
            return;
        };
        let url = format!("{}{}", base.trim_end_matches('/'), self.config.path);

        let started = Instant::now();
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let elapsed = started.elapsed();
                self.registry.apply_probe_success(name, &base, elapsed);
                debug!(
                    service = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "health probe ok"
                );
            }
            Ok(response) => {
                self.registry.apply_probe_failure(name, &base);
                warn!(
                    service = %name,
                    status = response.status().as_u16(),
                    "health probe returned non-success"
                );
            }
            Err(err) => {
                self.registry.apply_probe_failure(name, &base);
                warn!(service = %name, error = %err, "health probe failed");
            }
        }
    }

    /// Start the probe loop. The first round fires immediately; the loop
    /// runs until the returned handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            path = %self.config.path,
            "starting health checker"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                self.run_round().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.path, "/health");
    }
}
