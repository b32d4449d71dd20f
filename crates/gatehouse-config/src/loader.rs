//! Configuration loading.
//!
//! Discovery order: the `GATEHOUSE_CONFIG` environment variable, then
//! `./gatehouse.toml`, then built-in defaults. After the file is parsed a
//! handful of `GATEHOUSE_*` variables override individual fields, which is
//! how per-instance settings reach containerized deployments without
//! templating the file.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::settings::GatewayConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_VAR: &str = "GATEHOUSE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "gatehouse.toml";

/// Errors surfaced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for the schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// The configuration parsed but cannot work.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// An override variable held an unusable value.
    #[error("invalid value in {var}: {value}")]
    EnvOverride {
        /// Variable name.
        var: String,
        /// Rejected value.
        value: String,
    },
}

/// Loads [`GatewayConfig`] from disk and the environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load using the discovery order described in the module docs.
    pub async fn load() -> Result<GatewayConfig, ConfigError> {
        if let Ok(path) = env::var(CONFIG_PATH_VAR) {
            return Self::load_from_path(Path::new(&path)).await;
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_path(default).await;
        }
        warn!("no configuration file found, using built-in defaults");
        let mut config = GatewayConfig::default();
        Self::finish(&mut config)?;
        Ok(config)
    }

    /// Load from an explicit path, then apply env overrides and validate.
    pub async fn load_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config: GatewayConfig =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            path = %path.display(),
            services = config.services.len(),
            "loaded configuration"
        );
        Self::finish(&mut config)?;
        Ok(config)
    }

    fn finish(config: &mut GatewayConfig) -> Result<(), ConfigError> {
        Self::apply_env_overrides(config)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    fn apply_env_overrides(config: &mut GatewayConfig) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("GATEHOUSE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("GATEHOUSE_PORT") {
            match port.parse::<u16>() {
                Ok(value) => config.server.port = value,
                Err(_) => {
                    return Err(ConfigError::EnvOverride {
                        var: "GATEHOUSE_PORT".to_string(),
                        value: port,
                    })
                }
            }
        }
        if let Ok(environment) = env::var("GATEHOUSE_ENVIRONMENT") {
            config.server.environment = environment;
        }
        if let Ok(url) = env::var("GATEHOUSE_REDIS_URL") {
            config.rate_limit.redis_url = Some(url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use serial_test::serial;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    #[serial]
    async fn loads_a_full_file() {
        let file = write_config(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9090

            [services.core]
            urls = ["http://core:3001"]

            [services.billing]
            urls = ["http://billing-a:3004", "http://billing-b:3004"]
            timeout_ms = 10000
            retries = 1

            [rate_limit]
            max_requests = 50
            "#,
        );

        let config = ConfigLoader::load_from_path(file.path()).await.unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services["billing"].urls.len(), 2);
        assert_eq!(config.services["billing"].retries, 1);
        assert_eq!(config.rate_limit.max_requests, 50);
        assert_eq!(config.rate_limit.window_secs, 60);
    }

    #[tokio::test]
    #[serial]
    async fn missing_file_is_an_io_error() {
        let err = ConfigLoader::load_from_path(Path::new("/nonexistent/gatehouse.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn malformed_toml_is_a_parse_error() {
        let file = write_config("[server\nport = 9090");
        let err = ConfigLoader::load_from_path(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn unusable_config_is_rejected() {
        let file = write_config(
            r#"
            [services.claims]
            urls = []
            "#,
        );
        let err = ConfigLoader::load_from_path(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[tokio::test]
    #[serial]
    async fn env_vars_override_file_values() {
        let file = write_config(
            r#"
            [server]
            port = 9090
            environment = "development"
            "#,
        );
        env::set_var("GATEHOUSE_HOST", "10.0.0.5");
        env::set_var("GATEHOUSE_PORT", "7070");
        env::set_var("GATEHOUSE_ENVIRONMENT", "production");
        env::set_var("GATEHOUSE_REDIS_URL", "redis://cache:6379");

        let config = ConfigLoader::load_from_path(file.path()).await.unwrap();

        env::remove_var("GATEHOUSE_HOST");
        env::remove_var("GATEHOUSE_PORT");
        env::remove_var("GATEHOUSE_ENVIRONMENT");
        env::remove_var("GATEHOUSE_REDIS_URL");

        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.server.environment, "production");
        assert!(!config.server.is_development());
        assert_eq!(
            config.rate_limit.redis_url.as_deref(),
            Some("redis://cache:6379")
        );
    }

    #[tokio::test]
    #[serial]
    async fn bad_port_override_is_rejected() {
        let file = write_config("");
        env::set_var("GATEHOUSE_PORT", "not-a-port");

        let err = ConfigLoader::load_from_path(file.path()).await.unwrap_err();
        env::remove_var("GATEHOUSE_PORT");

        assert!(matches!(err, ConfigError::EnvOverride { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn load_without_file_or_env_uses_defaults() {
        env::remove_var(CONFIG_PATH_VAR);
        let cwd = env::current_dir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        env::set_current_dir(dir.path()).unwrap();

        let config = ConfigLoader::load().await.unwrap();

        env::set_current_dir(cwd).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.services.is_empty());
    }
}
