//! Token bucket algorithm.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::algorithm::{AlgorithmKind, RateLimitAlgorithm, RateLimitStats};
use super::clock::{system_clock, Clock};
use super::limiter::RateLimitConfig;
use super::store::KeyedStore;
use crate::error::{RatekeeperError, Result};

/// Allows bursts up to `capacity` and refills continuously at
/// `refill_rate` tokens per second.
///
/// A key seen for the first time starts with a full bucket. A
/// `refill_rate` of zero means a drained bucket never recovers.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    buckets: KeyedStore<BucketState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    /// Always within `[0, capacity]`
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Tokens available at `now` without touching the stored state.
    fn tokens_at(&self, now: Instant, capacity: f64, refill_rate: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * refill_rate).min(capacity)
    }

    fn refill(&mut self, now: Instant, capacity: f64, refill_rate: f64) {
        self.tokens = self.tokens_at(now, capacity, refill_rate);
        self.last_refill = now;
    }
}

impl TokenBucket {
    /// Create a token bucket using the system clock.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        Self::with_clock(capacity, refill_rate, system_clock())
    }

    /// Create a token bucket reading time from `clock`.
    pub fn with_clock(capacity: f64, refill_rate: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(RatekeeperError::InvalidConfig(format!(
                "capacity must be a positive number, got {}",
                capacity
            )));
        }
        if !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(RatekeeperError::InvalidConfig(format!(
                "refill_rate must be a non-negative number, got {}",
                refill_rate
            )));
        }

        Ok(Self {
            capacity,
            refill_rate,
            buckets: KeyedStore::new(),
            clock,
        })
    }

    /// A bucket holding `max_requests` tokens that refills fully over one
    /// window.
    pub(crate) fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: config.max_requests() as f64,
            refill_rate: config.requests_per_second(),
            buckets: KeyedStore::new(),
            clock,
        }
    }

    /// Maximum tokens a bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens currently available for `key`.
    pub fn available_tokens(&self, key: &str) -> f64 {
        let now = self.clock.now();
        self.buckets
            .inspect(key, |b| b.tokens_at(now, self.capacity, self.refill_rate))
            .unwrap_or(self.capacity)
    }

    /// Time for a bucket holding `tokens` to reach `target`.
    ///
    /// `None` if the bucket never gets there: it does not refill, or the
    /// target lies above capacity.
    fn time_to_reach(&self, tokens: f64, target: f64) -> Option<Duration> {
        let missing = target - tokens;
        if missing <= 0.0 {
            Some(Duration::ZERO)
        } else if self.refill_rate == 0.0 || target > self.capacity {
            None
        } else {
            Duration::try_from_secs_f64(missing / self.refill_rate).ok()
        }
    }
}

impl RateLimitAlgorithm for TokenBucket {
    fn try_acquire(&self, key: &str, hits: u32) -> bool {
        let now = self.clock.now();
        let cost = f64::from(hits);
        let (capacity, refill_rate) = (self.capacity, self.refill_rate);

        let (admitted, tokens) = self.buckets.update(
            key,
            || {
                debug!(key = %key, capacity = capacity, "Creating new token bucket");
                BucketState::full(capacity, now)
            },
            |bucket| {
                bucket.refill(now, capacity, refill_rate);
                if bucket.tokens >= cost {
                    bucket.tokens -= cost;
                    (true, bucket.tokens)
                } else {
                    (false, bucket.tokens)
                }
            },
        );

        trace!(key = %key, hits = hits, admitted = admitted, tokens = tokens, "Token bucket acquire");
        admitted
    }

    fn stats(&self, key: &str) -> RateLimitStats {
        let limit = self.capacity.floor() as u64;
        let tokens = self.available_tokens(key);
        let remaining = (tokens.floor() as u64).min(limit);

        RateLimitStats::new(
            limit,
            limit - remaining,
            self.time_to_reach(tokens, self.capacity),
            self.time_to_reach(tokens, 1.0),
        )
    }

    fn reset(&self, key: &str) {
        if self.buckets.remove(key) {
            debug!(key = %key, "Token bucket reset");
        }
    }

    fn clear(&self) {
        self.buckets.clear();
    }

    fn key_count(&self) -> usize {
        self.buckets.len()
    }

    fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let (capacity, refill_rate) = (self.capacity, self.refill_rate);
        self.buckets
            .retain(|b| b.tokens_at(now, capacity, refill_rate) < capacity)
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TokenBucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn bucket(capacity: f64, refill_rate: f64) -> (TokenBucket, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let bucket = TokenBucket::with_clock(capacity, refill_rate, clock.clone()).unwrap();
        (bucket, clock)
    }

    #[test]
    fn test_fresh_bucket_admits_capacity() {
        let (bucket, _clock) = bucket(5.0, 1.0);

        for i in 0..5 {
            assert!(bucket.acquire("user1"), "Request {} should be admitted", i);
        }
        // The 6th request should be rejected
        assert!(!bucket.acquire("user1"));
    }

    #[test]
    fn test_refill_after_idle() {
        let (bucket, clock) = bucket(2.0, 10.0);

        assert!(bucket.acquire("user1"));
        assert!(bucket.acquire("user1"));
        assert!(!bucket.acquire("user1"));

        clock.advance(Duration::from_millis(200));
        assert!(bucket.acquire("user1"));
        assert!(bucket.acquire("user1"));
        assert!(!bucket.acquire("user1"));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let (bucket, clock) = bucket(4.0, 2.0);

        for _ in 0..4 {
            assert!(bucket.acquire("k"));
        }
        // 2.5s at 2 tokens/s would be 5 tokens, capped at 4
        clock.advance_secs(2.5);

        let mut admitted = 0;
        while bucket.acquire("k") {
            admitted += 1;
        }
        assert_eq!(admitted, 4);
    }

    #[test]
    fn test_partial_refill_admits_floor() {
        let (bucket, clock) = bucket(10.0, 3.0);

        for _ in 0..10 {
            assert!(bucket.acquire("k"));
        }
        // 3 tokens/s * 1.5s = 4.5 tokens
        clock.advance_secs(1.5);

        let mut admitted = 0;
        while bucket.acquire("k") {
            admitted += 1;
        }
        assert_eq!(admitted, 4);
    }

    #[test]
    fn test_zero_refill_never_recovers() {
        let (bucket, clock) = bucket(1.0, 0.0);

        assert!(bucket.acquire("k"));
        clock.advance(Duration::from_secs(3600));
        assert!(!bucket.acquire("k"));

        let stats = bucket.stats("k");
        assert_eq!(stats.remaining, 0);
        assert_eq!(stats.retry_after, None);
        assert_eq!(stats.reset_after, None);
    }

    #[test]
    fn test_fractional_capacity_never_admits_a_unit_request() {
        let (bucket, clock) = bucket(0.5, 1.0);

        assert!(!bucket.acquire("k"));
        let stats = bucket.stats("k");
        assert_eq!(stats.limit, 0);
        assert_eq!(stats.retry_after, None);
        assert_eq!(stats.reset_after, Some(Duration::ZERO));

        clock.advance(Duration::from_secs(3600));
        assert!(!bucket.acquire("k"));
        assert_eq!(bucket.stats("k").retry_after, None);
    }

    #[test]
    fn test_rejection_does_not_debit() {
        let (bucket, _clock) = bucket(3.0, 0.0);

        assert!(bucket.try_acquire("k", 2));
        assert!(!bucket.try_acquire("k", 2));
        assert!((bucket.available_tokens("k") - 1.0).abs() < f64::EPSILON);
        assert!(bucket.try_acquire("k", 1));
    }

    #[test]
    fn test_keys_are_independent() {
        let (bucket, _clock) = bucket(1.0, 0.0);

        assert!(bucket.acquire("a"));
        assert!(!bucket.acquire("a"));
        assert!(bucket.acquire("b"));
    }

    #[test]
    fn test_stats_and_retry_after() {
        let (bucket, clock) = bucket(5.0, 2.0);

        for _ in 0..3 {
            bucket.acquire("k");
        }
        let stats = bucket.stats("k");
        assert_eq!(stats.limit, 5);
        assert_eq!(stats.requests_made, 3);
        assert_eq!(stats.remaining, 2);
        assert_eq!(stats.retry_after, Some(Duration::ZERO));
        assert_eq!(stats.reset_after, Some(Duration::from_secs_f64(1.5)));

        bucket.acquire("k");
        bucket.acquire("k");
        let stats = bucket.stats("k");
        assert_eq!(stats.remaining, 0);
        assert_eq!(stats.retry_after, Some(Duration::from_millis(500)));

        clock.advance(Duration::from_millis(500));
        assert!(bucket.acquire("k"));
    }

    #[test]
    fn test_reset_restores_full_bucket() {
        let (bucket, _clock) = bucket(2.0, 0.0);

        bucket.acquire("k");
        bucket.acquire("k");
        assert!(!bucket.acquire("k"));

        bucket.reset("k");
        assert_eq!(bucket.key_count(), 0);
        assert!(bucket.acquire("k"));
        assert!(bucket.acquire("k"));
        assert!(!bucket.acquire("k"));
    }

    #[test]
    fn test_purge_idle_drops_full_buckets() {
        let (bucket, clock) = bucket(2.0, 1.0);

        bucket.acquire("a");
        bucket.acquire("b");
        bucket.acquire("b");
        clock.advance(Duration::from_secs(1));

        // "a" has refilled to capacity, "b" is still one token short
        assert_eq!(bucket.purge_idle(), 1);
        assert_eq!(bucket.key_count(), 1);
    }

    #[tokio::test]
    async fn test_refill_with_system_clock() {
        let bucket = TokenBucket::new(2.0, 10.0).unwrap();

        assert!(bucket.acquire("user1"));
        assert!(bucket.acquire("user1"));
        assert!(!bucket.acquire("user1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(bucket.acquire("user1"));
    }

    #[test]
    fn test_invalid_construction() {
        assert!(TokenBucket::new(0.0, 1.0).is_err());
        assert!(TokenBucket::new(-1.0, 1.0).is_err());
        assert!(TokenBucket::new(f64::NAN, 1.0).is_err());
        assert!(TokenBucket::new(5.0, -0.5).is_err());
        assert!(TokenBucket::new(5.0, f64::INFINITY).is_err());
        assert!(TokenBucket::new(5.0, 0.0).is_ok());
    }
}
