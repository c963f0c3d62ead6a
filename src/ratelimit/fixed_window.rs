//! Fixed window counter algorithm.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::algorithm::{time_left, AlgorithmKind, RateLimitAlgorithm, RateLimitStats};
use super::clock::{system_clock, Clock};
use super::limiter::{validate_window, RateLimitConfig};
use super::store::KeyedStore;
use crate::error::Result;

/// Named window lengths accepted in tier rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

/// Cheap approximate admission control with O(1) state per key.
///
/// Each key counts requests in a window that starts at its first request and
/// rolls over once `window_size` has elapsed.
///
/// Because counts reset abruptly at the boundary, up to `2 * max_requests`
/// requests can be admitted in a short span straddling it: a full quota at
/// the end of one window and another at the start of the next. This is a
/// property of fixed windows. Use [`SlidingWindowCounter`] where exactness
/// matters.
///
/// [`SlidingWindowCounter`]: super::SlidingWindowCounter
#[derive(Debug)]
pub struct FixedWindowCounter {
    max_requests: u64,
    window_size: Duration,
    windows: KeyedStore<WindowState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: Instant,
    count: u64,
}

impl WindowState {
    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

impl FixedWindowCounter {
    /// Create a fixed window counter using the system clock.
    pub fn new(max_requests: u64, window_size: Duration) -> Result<Self> {
        Self::with_clock(max_requests, window_size, system_clock())
    }

    /// Create a fixed window counter reading time from `clock`.
    pub fn with_clock(
        max_requests: u64,
        window_size: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_window(max_requests, window_size)?;
        Ok(Self {
            max_requests,
            window_size,
            windows: KeyedStore::new(),
            clock,
        })
    }

    pub(crate) fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests: config.max_requests(),
            window_size: config.window_size(),
            windows: KeyedStore::new(),
            clock,
        }
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Get the current count for `key`, zero once its window has rolled.
    pub fn current_count(&self, key: &str) -> u64 {
        let now = self.clock.now();
        self.windows
            .inspect(key, |w| if w.expired(now, self.window_size) { 0 } else { w.count })
            .unwrap_or(0)
    }

    /// Get the duration until the current window for `key` resets.
    pub fn duration_until_reset(&self, key: &str) -> Duration {
        let now = self.clock.now();
        self.windows
            .inspect(key, |w| {
                time_left(self.window_size, now.saturating_duration_since(w.window_start))
            })
            .unwrap_or(Duration::ZERO)
    }
}

impl RateLimitAlgorithm for FixedWindowCounter {
    fn try_acquire(&self, key: &str, hits: u32) -> bool {
        let now = self.clock.now();
        let (max_requests, window) = (self.max_requests, self.window_size);

        let (admitted, count) = self.windows.update(
            key,
            || {
                debug!(key = %key, limit = max_requests, window = ?window, "Creating new fixed window");
                WindowState { window_start: now, count: 0 }
            },
            |state| {
                if state.expired(now, window) {
                    state.window_start = now;
                    state.count = 0;
                }
                if state.count + u64::from(hits) <= max_requests {
                    state.count += u64::from(hits);
                    (true, state.count)
                } else {
                    (false, state.count)
                }
            },
        );

        trace!(key = %key, hits = hits, admitted = admitted, count = count, "Fixed window acquire");
        admitted
    }

    fn stats(&self, key: &str) -> RateLimitStats {
        let now = self.clock.now();
        let (max_requests, window) = (self.max_requests, self.window_size);

        self.windows
            .inspect(key, |w| {
                if w.expired(now, window) || w.count == 0 {
                    return RateLimitStats::fresh(max_requests);
                }
                let reset_after = time_left(window, now.saturating_duration_since(w.window_start));
                let retry_after = if w.count < max_requests {
                    Duration::ZERO
                } else {
                    reset_after
                };
                RateLimitStats::new(max_requests, w.count, Some(reset_after), Some(retry_after))
            })
            .unwrap_or_else(|| RateLimitStats::fresh(max_requests))
    }

    fn reset(&self, key: &str) {
        if self.windows.remove(key) {
            debug!(key = %key, "Fixed window reset");
        }
    }

    fn clear(&self) {
        self.windows.clear();
    }

    fn key_count(&self) -> usize {
        self.windows.len()
    }

    fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let window = self.window_size;
        self.windows.retain(|w| !w.expired(now, window) && w.count > 0)
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::FixedWindow
    }
}
