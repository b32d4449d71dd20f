//! # Gatehouse Configuration
//!
//! Typed configuration for the gateway: the TOML schema with per-section
//! defaults, file discovery, and environment overrides.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatehouse_config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::load().await?;
//!     println!("binding {}", config.bind_addr());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod loader;
mod settings;

pub use loader::{ConfigError, ConfigLoader, CONFIG_PATH_VAR};
pub use settings::*;
