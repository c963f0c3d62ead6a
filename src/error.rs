//! Error types for Ratekeeper.

use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::RateLimitStats;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// A guarded operation was rejected by its rate limiter
    #[error("Rate limit exceeded for key '{key}'{}", format_retry_after(.retry_after))]
    RateLimitExceeded {
        /// The key that was throttled
        key: String,
        /// Limiter stats observed at rejection time
        stats: RateLimitStats,
        /// Suggested wait before retrying (`None` if the limiter never recovers)
        retry_after: Option<Duration>,
    },

    /// A tier label that no limiter was registered for
    #[error("Unknown rate limit tier: {0}")]
    UnknownTier(String),

    /// Construction-time validation errors
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatekeeperError {
    /// Whether the caller can reasonably retry the failed operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RatekeeperError::RateLimitExceeded { retry_after: Some(_), .. })
    }
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.3}s", d.as_secs_f64()),
        None => ", no recovery expected".to_string(),
    }
}

impl From<config::ConfigError> for RatekeeperError {
    fn from(e: config::ConfigError) -> Self {
        RatekeeperError::Config(e.to_string())
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;
