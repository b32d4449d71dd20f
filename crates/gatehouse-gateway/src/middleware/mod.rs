mod auth;
mod correlation;
mod ratelimit;

pub use auth::{authenticate, AuthContext};
pub use correlation::correlation;
pub use ratelimit::rate_limit;
