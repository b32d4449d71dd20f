//! Gateway configuration schema.
//!
//! Every section has usable defaults; a config file only needs the parts it
//! changes. Service entries are keyed by service name and have no default,
//! since upstream addresses are deployment-specific.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream services, keyed by service name (`core`, `insurance`,
    /// `hospital`, `billing`, `claims`, `payment`).
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Background health probing.
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Circuit breaker thresholds, applied to every service.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Request rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Proxy timeouts.
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Browser origin allowances.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl GatewayConfig {
    /// `host:port` string for the listener bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject configurations that cannot work. Called by the loader after
    /// parsing and env overrides.
    pub fn validate(&self) -> Result<(), String> {
        for (name, service) in &self.services {
            if service.urls.is_empty() {
                return Err(format!("service '{name}' has no urls"));
            }
            for url in &service.urls {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(format!("service '{name}' url '{url}' is not http(s)"));
                }
            }
        }
        if self.proxy.hard_timeout_secs <= self.proxy.soft_timeout_secs {
            return Err(format!(
                "proxy hard timeout ({}s) must exceed the soft timeout ({}s)",
                self.proxy.hard_timeout_secs, self.proxy.soft_timeout_secs
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err("rate_limit.max_requests must be at least 1".to_string());
        }
        if self.rate_limit.window_secs == 0 {
            return Err("rate_limit.window_secs must be at least 1".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if self.health_check.interval_secs == 0 {
            return Err("health_check.interval_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum accepted request body, in megabytes.
    pub body_limit_mb: usize,
    /// Deployment environment. Error responses include failure detail only
    /// when this is `development`.
    pub environment: String,
}

impl ServerConfig {
    /// Whether error responses may carry internal failure detail.
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_mb: 10,
            environment: "production".to_string(),
        }
    }
}

/// One upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Instance base URLs; requests rotate through them.
    pub urls: Vec<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry budget for internal calls.
    #[serde(default = "default_service_retries")]
    pub retries: u32,
}

fn default_service_timeout_ms() -> u64 {
    30_000
}

fn default_service_retries() -> u32 {
    3
}

/// Background health probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Seconds between probe rounds.
    pub interval_secs: u64,
    /// Per-probe timeout in seconds.
    pub probe_timeout_secs: u64,
    /// Path probed on each instance.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_secs: 5,
            path: "/health".to_string(),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure budget before a breaker opens.
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before allowing a trial request.
    pub recovery_timeout_secs: u64,
    /// Advisory observation window, surfaced for operators.
    pub monitoring_period_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            monitoring_period_secs: 10,
        }
    }
}

/// Request rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per identity and endpoint per window.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Redis URL for counters shared across gateway instances. Absent means
    /// in-process counters.
    pub redis_url: Option<String>,
    /// Seconds between sweeps of expired in-process windows.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
            redis_url: None,
            sweep_interval_secs: 60,
        }
    }
}

/// Proxy timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream request timeout in seconds.
    pub soft_timeout_secs: u64,
    /// Outer ceiling in seconds; must exceed the soft timeout.
    pub hard_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            soft_timeout_secs: 30,
            hard_timeout_secs: 35,
        }
    }
}

/// Browser origin allowances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to call the gateway from a browser. Empty allows any
    /// origin.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [services.core]
            urls = ["http://core:3001"]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(!config.server.is_development());
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        let core = &config.services["core"];
        assert_eq!(core.timeout_ms, 30_000);
        assert_eq!(core.retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn service_without_urls_fails_validation() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [services.billing]
            urls = []
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("billing"));
    }

    #[test]
    fn non_http_url_fails_validation() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [services.claims]
            urls = ["claims:3005"]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_proxy_timeouts_fail_validation() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [proxy]
            soft_timeout_secs = 40
            hard_timeout_secs = 35
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("hard timeout"));
    }
}
