//! Sliding window log algorithm.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::algorithm::{time_left, AlgorithmKind, RateLimitAlgorithm, RateLimitStats};
use super::clock::{system_clock, Clock};
use super::limiter::{validate_window, RateLimitConfig};
use super::store::KeyedStore;
use crate::error::Result;

/// Exact sliding window admission control.
///
/// Each key keeps the timestamps of its admitted requests. A request is
/// admitted if fewer than `max_requests` timestamps fall inside the trailing
/// `window_size`. Expired timestamps are pruned on every call, so the log
/// never holds more than `max_requests` entries.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    max_requests: u64,
    window_size: Duration,
    logs: KeyedStore<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    /// Create a sliding window counter using the system clock.
    pub fn new(max_requests: u64, window_size: Duration) -> Result<Self> {
        Self::with_clock(max_requests, window_size, system_clock())
    }

    /// Create a sliding window counter reading time from `clock`.
    pub fn with_clock(
        max_requests: u64,
        window_size: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_window(max_requests, window_size)?;
        Ok(Self {
            max_requests,
            window_size,
            logs: KeyedStore::new(),
            clock,
        })
    }

    pub(crate) fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests: config.max_requests(),
            window_size: config.window_size(),
            logs: KeyedStore::new(),
            clock,
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = log.front() {
            if now.saturating_duration_since(oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimitAlgorithm for SlidingWindowCounter {
    fn try_acquire(&self, key: &str, hits: u32) -> bool {
        let now = self.clock.now();
        let (max_requests, window) = (self.max_requests, self.window_size);

        let (admitted, count) = self.logs.update(
            key,
            || {
                debug!(key = %key, limit = max_requests, window = ?window, "Creating new sliding window");
                VecDeque::new()
            },
            |log| {
                Self::prune(log, now, window);
                if log.len() as u64 + u64::from(hits) <= max_requests {
                    log.extend(std::iter::repeat(now).take(hits as usize));
                    (true, log.len())
                } else {
                    (false, log.len())
                }
            },
        );

        trace!(key = %key, hits = hits, admitted = admitted, count = count, "Sliding window acquire");
        admitted
    }

    fn stats(&self, key: &str) -> RateLimitStats {
        let now = self.clock.now();
        let window = self.window_size;

        self.logs
            .inspect(key, |log| {
                let live: Vec<Instant> = log
                    .iter()
                    .copied()
                    .filter(|ts| now.saturating_duration_since(*ts) < window)
                    .collect();

                let reset_after = live
                    .last()
                    .map(|newest| time_left(window, now.saturating_duration_since(*newest)))
                    .unwrap_or(Duration::ZERO);

                // One slot frees up when the oldest entry that keeps us at the
                // limit leaves the window.
                let made = live.len() as u64;
                let retry_after = if made < self.max_requests {
                    Duration::ZERO
                } else {
                    let blocking = live[(made - self.max_requests) as usize];
                    time_left(window, now.saturating_duration_since(blocking))
                };

                RateLimitStats::new(self.max_requests, made, Some(reset_after), Some(retry_after))
            })
            .unwrap_or_else(|| RateLimitStats::fresh(self.max_requests))
    }

    fn reset(&self, key: &str) {
        if self.logs.remove(key) {
            debug!(key = %key, "Sliding window reset");
        }
    }

    fn clear(&self) {
        self.logs.clear();
    }

    fn key_count(&self) -> usize {
        self.logs.len()
    }

    fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let window = self.window_size;
        self.logs.retain(|log| {
            log.back()
                .map(|newest| now.saturating_duration_since(*newest) < window)
                .unwrap_or(false)
        })
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    fn counter(max_requests: u64, window_secs: f64) -> (SlidingWindowCounter, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let counter = SlidingWindowCounter::with_clock(
            max_requests,
            Duration::from_secs_f64(window_secs),
            clock.clone(),
        )
        .unwrap();
        (counter, clock)
    }

    #[test]
    fn test_admits_up_to_max_requests() {
        let (counter, _clock) = counter(3, 1.0);

        for _ in 0..3 {
            assert!(counter.acquire("user1"));
        }
        assert!(!counter.acquire("user1"));
    }

    #[test]
    fn test_window_expiry_admits_full_quota_again() {
        let (counter, clock) = counter(2, 0.2);

        assert!(counter.acquire("user1"));
        assert!(counter.acquire("user1"));
        assert!(!counter.acquire("user1"));

        clock.advance(Duration::from_millis(300));
        assert!(counter.acquire("user1"));
        assert!(counter.acquire("user1"));
        assert!(!counter.acquire("user1"));
    }

    #[test]
    fn test_trailing_window_is_exact() {
        let (counter, clock) = counter(2, 1.0);

        assert!(counter.acquire("k")); // t = 0.0
        clock.advance_secs(0.5);
        assert!(counter.acquire("k")); // t = 0.5
        assert!(!counter.acquire("k"));

        // At t = 1.0 the first request leaves the window, the second stays
        clock.advance_secs(0.5);
        assert!(counter.acquire("k"));
        assert!(!counter.acquire("k"));
    }

    #[test]
    fn test_log_is_bounded_by_max_requests() {
        let (counter, clock) = counter(3, 1.0);

        for _ in 0..10 {
            counter.acquire("k");
            clock.advance_secs(0.1);
        }
        let len = counter.logs.inspect("k", |log| log.len()).unwrap();
        assert!(len <= 3);
    }

    #[test]
    fn test_multi_hit_acquire() {
        let (counter, _clock) = counter(5, 1.0);

        assert!(counter.try_acquire("k", 3));
        assert!(!counter.try_acquire("k", 3));
        assert!(counter.try_acquire("k", 2));
        assert_eq!(counter.stats("k").remaining, 0);
    }

    #[test]
    fn test_stats() {
        let (counter, clock) = counter(5, 1.0);

        assert_eq!(counter.stats("unseen"), RateLimitStats::fresh(5));

        for _ in 0..3 {
            counter.acquire("user1");
        }
        let stats = counter.stats("user1");
        assert_eq!(stats.requests_made, 3);
        assert_eq!(stats.remaining, 2);
        assert_eq!(stats.retry_after, Some(Duration::ZERO));
        assert_eq!(stats.reset_after, Some(Duration::from_secs(1)));

        counter.acquire("user1");
        clock.advance_secs(0.25);
        counter.acquire("user1");
        let stats = counter.stats("user1");
        assert_eq!(stats.remaining, 0);
        assert_eq!(stats.retry_after, Some(Duration::from_millis(750)));
        assert_eq!(stats.reset_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_reset_and_purge() {
        let (counter, clock) = counter(1, 1.0);

        assert!(counter.acquire("a"));
        assert!(!counter.acquire("a"));
        counter.reset("a");
        assert!(counter.acquire("a"));

        clock.advance_secs(0.5);
        counter.acquire("b");
        clock.advance_secs(0.6);

        // "a" has fully expired, "b" has not
        assert_eq!(counter.purge_idle(), 1);
        assert_eq!(counter.key_count(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_sleeping_past_window() {
        let counter = SlidingWindowCounter::new(3, Duration::from_secs(1)).unwrap();

        for _ in 0..3 {
            assert!(counter.acquire("user1"));
        }
        assert!(!counter.acquire("user1"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        for _ in 0..3 {
            assert!(counter.acquire("user1"));
        }
        assert!(!counter.acquire("user1"));
    }

    #[test]
    fn test_invalid_construction() {
        assert!(SlidingWindowCounter::new(0, Duration::from_secs(1)).is_err());
        assert!(SlidingWindowCounter::new(1, Duration::ZERO).is_err());
    }
}
