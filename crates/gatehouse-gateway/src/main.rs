// Gatehouse Gateway - API gateway for the insurance platform
//
// This binary provides:
// - Request routing to the upstream microservices
// - Per-service health checking and circuit breaking
// - Bearer token authentication and rate limiting
// - Correlation id propagation and request logging

use gatehouse_config::ConfigLoader;
use gatehouse_gateway::{server, state};
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit codes for different scenarios
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const STARTUP_ERROR: i32 = 2;
    pub const RUNTIME_ERROR: i32 = 3;
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting gatehouse gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match ConfigLoader::load().await {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(exit_codes::CONFIG_ERROR);
        }
    };

    // Wire the registry, rate limiter, and health checker
    let (state, checker) = match state::build(&config).await {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to initialize gateway state: {}", e);
            process::exit(exit_codes::STARTUP_ERROR);
        }
    };

    // First probe round fires immediately, so services come up without
    // waiting a full interval.
    let probe_loop = checker.spawn();

    match server::start_server(state, &config).await {
        Ok(()) => {
            probe_loop.abort();
            info!("Gateway stopped");
            process::exit(exit_codes::SUCCESS);
        }
        Err(e) => {
            probe_loop.abort();
            error!("Gateway server failed: {}", e);
            process::exit(exit_codes::RUNTIME_ERROR);
        }
    }
}
