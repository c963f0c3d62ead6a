//! Rate limiting algorithms, policies and guards.

mod algorithm;
mod backend;
mod clock;
mod fixed_window;
mod guard;
mod limiter;
mod rules;
mod sliding_window;
mod store;
mod tiered;
mod token_bucket;

pub use algorithm::{AlgorithmKind, LimitState, RateLimitAlgorithm, RateLimitStats};
pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use fixed_window::{FixedWindowCounter, TimeWindow};
pub use guard::{rate_limited, rate_limited_by, RateLimitGuard, RateLimited};
pub use limiter::{RateLimitConfig, RateLimiter};
pub use rules::{TierRule, TierRules};
pub use sliding_window::SlidingWindowCounter;
pub use tiered::{TierLimiter, TieredRateLimiter};
pub use token_bucket::TokenBucket;
