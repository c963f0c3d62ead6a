//! The common interface of the admission algorithms.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An admission algorithm tracking independent state per key.
///
/// Rejection is not an error: `try_acquire` simply returns `false`.
pub trait RateLimitAlgorithm: Send + Sync + fmt::Debug {
    /// Try to admit a request costing `hits` units for `key`.
    ///
    /// Returns `true` if admitted. The read-compute-write of the key's state
    /// happens as one atomic step.
    fn try_acquire(&self, key: &str, hits: u32) -> bool;

    /// Try to admit a single unit request for `key`.
    fn acquire(&self, key: &str) -> bool {
        self.try_acquire(key, 1)
    }

    /// Stats for `key` as of now. An unseen key reports a fresh state.
    fn stats(&self, key: &str) -> RateLimitStats;

    /// Forget all state for `key`.
    fn reset(&self, key: &str);

    /// Forget all state for every key.
    fn clear(&self);

    /// Number of keys with live state.
    fn key_count(&self) -> usize;

    /// Drop entries that are already indistinguishable from a fresh key.
    ///
    /// Returns the number of entries removed.
    fn purge_idle(&self) -> usize;

    /// Which algorithm this is.
    fn kind(&self) -> AlgorithmKind;
}

/// The available admission algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Burst up to capacity, continuous refill
    TokenBucket,
    /// Exact trailing window over a timestamp log
    #[default]
    SlidingWindow,
    /// Counter reset on window boundaries
    FixedWindow,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlgorithmKind::TokenBucket => "token_bucket",
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::FixedWindow => "fixed_window",
        };
        f.write_str(name)
    }
}

/// Whether a key can currently be admitted.
///
/// This is a view derived from the algorithm state; nothing stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitState {
    /// Capacity available
    Admitting,
    /// Capacity exhausted until the algorithm recovers on its own
    Throttled,
}

/// A snapshot of one key's usage.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    /// Requests permitted per window (or bucket capacity)
    pub limit: u64,
    /// Requests counted against the limit right now
    pub requests_made: u64,
    /// Requests that would still be admitted right now
    pub remaining: u64,
    /// Time until the key is back to a fresh state (`None`: never)
    pub reset_after: Option<Duration>,
    /// Time until one more unit request would be admitted (`None`: never)
    pub retry_after: Option<Duration>,
    /// Wall-clock projection of `reset_after`
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitStats {
    /// Stats for a key that has never been seen.
    pub fn fresh(limit: u64) -> Self {
        Self::new(limit, 0, Some(Duration::ZERO), Some(Duration::ZERO))
    }

    /// Build stats from usage and recovery timings.
    ///
    /// `remaining` is derived as `limit - requests_made`, floored at zero.
    pub fn new(
        limit: u64,
        requests_made: u64,
        reset_after: Option<Duration>,
        retry_after: Option<Duration>,
    ) -> Self {
        let reset_at = reset_after
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| Utc::now().checked_add_signed(d));

        Self {
            limit,
            requests_made,
            remaining: limit.saturating_sub(requests_made),
            reset_after,
            retry_after,
            reset_at,
        }
    }

    /// The admission state these stats describe.
    pub fn state(&self) -> LimitState {
        if self.remaining > 0 {
            LimitState::Admitting
        } else {
            LimitState::Throttled
        }
    }
}

// `reset_at` is derived from the wall clock at snapshot time, so it is left
// out of equality.
impl PartialEq for RateLimitStats {
    fn eq(&self, other: &Self) -> bool {
        self.limit == other.limit
            && self.requests_made == other.requests_made
            && self.remaining == other.remaining
            && self.reset_after == other.reset_after
            && self.retry_after == other.retry_after
    }
}

/// Time left from `elapsed` until `window` is reached.
pub(crate) fn time_left(window: Duration, elapsed: Duration) -> Duration {
    window.saturating_sub(elapsed)
}
