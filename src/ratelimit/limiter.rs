//! Rate limit policy: one algorithm bound to one configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::algorithm::{AlgorithmKind, LimitState, RateLimitAlgorithm, RateLimitStats};
use super::backend::RateLimiterBackend;
use super::clock::{system_clock, Clock};
use super::fixed_window::FixedWindowCounter;
use super::sliding_window::SlidingWindowCounter;
use super::token_bucket::TokenBucket;
use crate::error::{RatekeeperError, Result};

/// Reject window configurations that could never admit anything.
pub(crate) fn validate_window(max_requests: u64, window_size: Duration) -> Result<()> {
    if max_requests == 0 {
        return Err(RatekeeperError::InvalidConfig(
            "max_requests must be a positive integer".to_string(),
        ));
    }
    if window_size.is_zero() {
        return Err(RatekeeperError::InvalidConfig(
            "window_size must be positive".to_string(),
        ));
    }
    Ok(())
}

/// An immutable rate limit policy: `max_requests` per `window_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitConfig {
    max_requests: u64,
    window_size: Duration,
}

impl RateLimitConfig {
    /// Create a configuration with the window given in seconds.
    pub fn new(max_requests: u64, window_secs: f64) -> Result<Self> {
        if !window_secs.is_finite() || window_secs <= 0.0 {
            return Err(RatekeeperError::InvalidConfig(format!(
                "window_size must be a positive number of seconds, got {}",
                window_secs
            )));
        }
        let window_size = Duration::try_from_secs_f64(window_secs)
            .map_err(|e| RatekeeperError::InvalidConfig(format!("window_size out of range: {}", e)))?;
        Self::from_duration(max_requests, window_size)
    }

    /// Create a configuration from a window duration.
    pub fn from_duration(max_requests: u64, window_size: Duration) -> Result<Self> {
        validate_window(max_requests, window_size)?;
        Ok(Self {
            max_requests,
            window_size,
        })
    }

    /// Maximum requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Length of the window.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Steady-state admission rate in requests per second.
    pub fn requests_per_second(&self) -> f64 {
        self.max_requests as f64 / self.window_size.as_secs_f64()
    }

    /// Build the algorithm `kind` enforcing this configuration.
    ///
    /// A token bucket gets `capacity = max_requests` and refills a full
    /// bucket over one window.
    pub fn build_algorithm(
        &self,
        kind: AlgorithmKind,
        clock: Arc<dyn Clock>,
    ) -> Arc<dyn RateLimitAlgorithm> {
        match kind {
            AlgorithmKind::TokenBucket => Arc::new(TokenBucket::from_config(self, clock)),
            AlgorithmKind::SlidingWindow => Arc::new(SlidingWindowCounter::from_config(self, clock)),
            AlgorithmKind::FixedWindow => Arc::new(FixedWindowCounter::from_config(self, clock)),
        }
    }
}

/// Binds one admission algorithm and a [`RateLimitConfig`] to arbitrary keys.
///
/// This struct is thread-safe and can be shared across multiple tasks.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    algorithm: Arc<dyn RateLimitAlgorithm>,
}

impl RateLimiter {
    /// Create a rate limiter using the sliding window algorithm.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_algorithm(config, AlgorithmKind::SlidingWindow)
    }

    /// Create a rate limiter using the given algorithm.
    pub fn with_algorithm(config: RateLimitConfig, kind: AlgorithmKind) -> Self {
        Self::with_clock(config, kind, system_clock())
    }

    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(config: RateLimitConfig, kind: AlgorithmKind, clock: Arc<dyn Clock>) -> Self {
        let algorithm = config.build_algorithm(kind, clock);
        Self { config, algorithm }
    }

    /// Wrap an algorithm built elsewhere, e.g. a token bucket whose capacity
    /// and refill rate are chosen independently.
    pub fn from_algorithm(config: RateLimitConfig, algorithm: Arc<dyn RateLimitAlgorithm>) -> Self {
        Self { config, algorithm }
    }

    /// Check the rate limit for `key`, consuming one unit if admitted.
    pub async fn check_rate_limit(&self, key: &str) -> bool {
        self.check_rate_limit_hits(key, 1).await
    }

    /// Check the rate limit for `key`, consuming `hits` units if admitted.
    pub async fn check_rate_limit_hits(&self, key: &str, hits: u32) -> bool {
        trace!(key = %key, hits = hits, algorithm = %self.algorithm.kind(), "Checking rate limit");

        let admitted = self.algorithm.try_acquire(key, hits);
        if !admitted {
            let stats = self.algorithm.stats(key);
            debug!(key = %key, limit = stats.limit, retry_after = ?stats.retry_after, "Rate limit exceeded");
        }
        admitted
    }

    /// Usage stats for `key`. An unseen key reports a fresh state.
    pub fn get_stats(&self, key: &str) -> RateLimitStats {
        self.algorithm.stats(key)
    }

    /// Whether `key` is currently admitting or throttled.
    pub fn state(&self, key: &str) -> LimitState {
        self.get_stats(key).state()
    }

    /// Clear all state for `key`, as if it had never been seen.
    pub fn reset(&self, key: &str) {
        self.algorithm.reset(key);
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.algorithm.clear();
    }

    /// Get the number of keys with live state.
    pub fn key_count(&self) -> usize {
        self.algorithm.key_count()
    }

    /// Drop state that is indistinguishable from a fresh key.
    pub fn purge_idle(&self) -> usize {
        let purged = self.algorithm.purge_idle();
        if purged > 0 {
            debug!(purged = purged, "Purged idle rate limit state");
        }
        purged
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }
}

#[async_trait]
impl RateLimiterBackend for RateLimiter {
    async fn check_rate_limit(&self, key: &str, hits: u32) -> bool {
        self.check_rate_limit_hits(key, hits).await
    }

    fn get_stats(&self, key: &str) -> RateLimitStats {
        RateLimiter::get_stats(self, key)
    }
}
