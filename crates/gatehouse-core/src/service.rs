//! Service identity, descriptors, and health snapshots.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The logical upstream services behind the gateway.
///
/// This is a closed set on purpose. Adding a service is a code change, which
/// keeps route tables, config parsing, and health handling exhaustive at
/// compile time instead of failing at runtime on a typo in a config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    /// Accounts, auth, and user profiles.
    Core,
    /// Insurance schemes, members, and contracts.
    Insurance,
    /// Hospitals and care institutions.
    Hospital,
    /// Invoicing.
    Billing,
    /// Claim intake and adjudication.
    Claims,
    /// Payment execution and provider callbacks.
    Payment,
}

impl ServiceName {
    pub const ALL: [ServiceName; 6] = [
        ServiceName::Core,
        ServiceName::Insurance,
        ServiceName::Hospital,
        ServiceName::Billing,
        ServiceName::Claims,
        ServiceName::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Core => "core",
            ServiceName::Insurance => "insurance",
            ServiceName::Hospital => "hospital",
            ServiceName::Billing => "billing",
            ServiceName::Claims => "claims",
            ServiceName::Payment => "payment",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown service: {0}")]
pub struct UnknownService(pub String);

impl FromStr for ServiceName {
    type Err = UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(ServiceName::Core),
            "insurance" => Ok(ServiceName::Insurance),
            "hospital" => Ok(ServiceName::Hospital),
            "billing" => Ok(ServiceName::Billing),
            "claims" => Ok(ServiceName::Claims),
            "payment" => Ok(ServiceName::Payment),
            other => Err(UnknownService(other.to_string())),
        }
    }
}

/// Static description of one upstream service, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    /// Base URLs of the running instances. Requests and health probes rotate
    /// through these with a shared round-robin cursor. The circuit breaker is
    /// shared by the whole set, so a single dark instance can open the
    /// circuit for all of them.
    pub instances: Vec<String>,
    /// Per-request timeout for calls to this service.
    pub timeout: Duration,
    /// Retry budget for [`crate::registry::ServiceRegistry::retry_request`].
    pub retries: u32,
}

impl ServiceDescriptor {
    pub fn new(name: ServiceName, url: impl Into<String>) -> Self {
        Self {
            name,
            instances: vec![url.into()],
            timeout: Duration::from_secs(30),
            retries: 3,
        }
    }

    pub fn with_instances(name: ServiceName, instances: Vec<String>) -> Self {
        Self {
            name,
            instances,
            timeout: Duration::from_secs(30),
            retries: 3,
        }
    }
}

/// Point-in-time health view of one service, as exposed on the health
/// endpoints.
///
/// The mutable fields are owned by the background checker: a successful
/// probe sets `healthy` and zeroes `consecutive_error_count`, a failed probe
/// clears `healthy` and bumps the count. Proxy failures influence this view
/// only through the circuit breaker, whose state is mirrored into
/// `circuit_breaker_open` at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    /// Instance URL targeted by the most recent probe.
    pub url: String,
    pub healthy: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Latency of the last successful probe. Stays at the last good reading
    /// across failed probes, `None` until the first success.
    pub last_response_time_ms: Option<u64>,
    pub consecutive_error_count: u32,
    pub circuit_breaker_open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_round_trip() {
        for name in ServiceName::ALL {
            assert_eq!(name.as_str().parse::<ServiceName>().unwrap(), name);
        }
    }

    #[test]
    fn test_unknown_service_name_rejected() {
        let err = "pharmacy".parse::<ServiceName>().unwrap_err();
        assert_eq!(err.to_string(), "unknown service: pharmacy");
    }

    #[test]
    fn test_service_name_serializes_lowercase() {
        let json = serde_json::to_string(&ServiceName::Insurance).unwrap();
        assert_eq!(json, "\"insurance\"");
    }

    #[test]
    fn test_service_health_camel_case_fields() {
        let health = ServiceHealth {
            url: "http://localhost:3004".to_string(),
            healthy: true,
            last_checked_at: None,
            last_response_time_ms: Some(12),
            consecutive_error_count: 2,
            circuit_breaker_open: false,
        };
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["url"], "http://localhost:3004");
        assert_eq!(value["healthy"], true);
        assert_eq!(value["lastCheckedAt"], serde_json::Value::Null);
        assert_eq!(value["lastResponseTimeMs"], 12);
        assert_eq!(value["consecutiveErrorCount"], 2);
        assert_eq!(value["circuitBreakerOpen"], false);
    }
}
