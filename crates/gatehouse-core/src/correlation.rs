//! Request correlation ids.
//!
//! Every inbound request carries one id from the edge of the gateway through
//! the proxied upstream call and back out in the response, so one grep over
//! the combined logs reconstructs a request's path across services.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header used both inbound (client-supplied ids are honored) and outbound
/// (toward upstreams and in every gateway response).
pub const CORRELATION_HEADER: &str = "x-correlation-id";

const MAX_ID_LEN: usize = 128;

/// Opaque correlation id. Minted as a UUID v4 when the client does not
/// supply one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-supplied id. Empty, oversized, or non-printable
    /// values are rejected and the caller mints a fresh one instead.
    pub fn from_header(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_ID_LEN {
            return None;
        }
        if !trimmed.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
