//! Configuration management for Ratekeeper.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides, e.g.
/// `RATEKEEPER__LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "RATEKEEPER";

/// Main configuration for the Ratekeeper binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the tier rules file
    pub rules_path: Option<String>,
}

impl RatekeeperConfig {
    /// Load configuration from an optional file path, layered with
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
