//! Rate limiter trait for abstracting admission policies.

use async_trait::async_trait;

use super::algorithm::RateLimitStats;

/// Trait for admission policies the guard layer can consult.
///
/// This trait abstracts over a plain [`RateLimiter`] and a tier-bound
/// [`TierLimiter`] so the guard can wrap either.
///
/// [`RateLimiter`]: super::RateLimiter
/// [`TierLimiter`]: super::TierLimiter
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Check the rate limit for `key`, consuming `hits` units if admitted.
    async fn check_rate_limit(&self, key: &str, hits: u32) -> bool;

    /// Usage stats for `key`.
    fn get_stats(&self, key: &str) -> RateLimitStats;
}

