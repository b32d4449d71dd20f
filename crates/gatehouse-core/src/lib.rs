pub mod breaker;
pub mod correlation;
pub mod envelope;
pub mod health;
pub mod ratelimit;
pub mod registry;
pub mod service;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use correlation::{CorrelationId, CORRELATION_HEADER};
pub use envelope::{Envelope, ErrorBody, ErrorCode, Meta, Pagination, API_VERSION};
pub use health::{HealthCheckConfig, HealthChecker};
pub use ratelimit::{
    MemoryStore, RateLimitConfig, RateLimitDecision, RateLimitError, RateLimitStore, RateLimiter,
    RedisStore,
};
pub use registry::{RegistryError, ServiceClient, ServiceRegistry};
pub use service::{ServiceDescriptor, ServiceHealth, ServiceName, UnknownService};
