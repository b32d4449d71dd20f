//! # Gatehouse Gateway
//!
//! The HTTP entry point of the platform: an axum server that authenticates
//! and rate limits `/api` traffic, then proxies it to the owning upstream
//! service with health gating and circuit breaking from `gatehouse-core`.

pub mod proxy;
pub mod routes;
pub mod server;
pub mod state;

mod error;
mod middleware;

pub use error::{GatewayError, Result};
pub use server::{build_router, start_server};
pub use state::AppState;
