//! Tier rules configuration.
//!
//! This module handles loading tier definitions from YAML. Each tier names
//! a limit, a window and optionally the algorithm enforcing it:
//!
//! ```yaml
//! tiers:
//!   free:
//!     max_requests: 2
//!     window_size: 1.0
//!   premium:
//!     max_requests: 10
//!     unit: second
//!     algorithm: token_bucket
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::algorithm::AlgorithmKind;
use super::clock::Clock;
use super::fixed_window::TimeWindow;
use super::limiter::{RateLimitConfig, RateLimiter};
use super::token_bucket::TokenBucket;
use crate::error::{RatekeeperError, Result};

/// A complete set of tier definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierRules {
    /// Map of tier name to its rule
    #[serde(default)]
    pub tiers: BTreeMap<String, TierRule>,
}

/// The rate limit applied to one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierRule {
    /// Number of requests allowed per window
    pub max_requests: u64,
    /// Window length in seconds
    #[serde(default)]
    pub window_size: Option<f64>,
    /// Named window length, an alternative to `window_size`
    #[serde(default)]
    pub unit: Option<TimeWindow>,
    /// Algorithm enforcing the limit
    #[serde(default)]
    pub algorithm: AlgorithmKind,
    /// Token bucket capacity (defaults to `max_requests`)
    #[serde(default)]
    pub capacity: Option<f64>,
    /// Token bucket refill rate in tokens per second (defaults to a full
    /// bucket per window)
    #[serde(default)]
    pub refill_rate: Option<f64>,
}

impl TierRule {
    /// The window this rule describes.
    pub fn window(&self) -> Result<Duration> {
        match (self.window_size, self.unit) {
            (Some(_), Some(_)) => Err(RatekeeperError::InvalidConfig(
                "set either window_size or unit, not both".to_string(),
            )),
            (None, None) => Err(RatekeeperError::InvalidConfig(
                "one of window_size or unit is required".to_string(),
            )),
            (Some(secs), None) => RateLimitConfig::new(self.max_requests, secs).map(|c| c.window_size()),
            (None, Some(unit)) => Ok(unit.duration()),
        }
    }

    /// The validated limit configuration for this rule.
    pub fn limit_config(&self) -> Result<RateLimitConfig> {
        RateLimitConfig::from_duration(self.max_requests, self.window()?)
    }

    /// Build the rate limiter this rule describes.
    pub fn build_limiter(&self, clock: Arc<dyn Clock>) -> Result<RateLimiter> {
        let config = self.limit_config()?;

        let has_bucket_params = self.capacity.is_some() || self.refill_rate.is_some();
        if !has_bucket_params {
            return Ok(RateLimiter::with_clock(config, self.algorithm, clock));
        }
        if self.algorithm != AlgorithmKind::TokenBucket {
            return Err(RatekeeperError::InvalidConfig(format!(
                "capacity and refill_rate only apply to token_bucket, not {}",
                self.algorithm
            )));
        }

        let bucket = TokenBucket::with_clock(
            self.capacity.unwrap_or(config.max_requests() as f64),
            self.refill_rate.unwrap_or_else(|| config.requests_per_second()),
            clock,
        )?;
        Ok(RateLimiter::from_algorithm(config, Arc::new(bucket)))
    }
}

impl TierRules {
    /// Create an empty set of rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading tier rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse tier rules: {}", e)))
    }

    /// Get the rule for a specific tier.
    pub fn get_tier(&self, tier: &str) -> Option<&TierRule> {
        self.tiers.get(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    #[test]
    fn test_parse_rules() {
        let yaml = r#"
tiers:
  free:
    max_requests: 2
    window_size: 1.0
  premium:
    max_requests: 10
    unit: minute
    algorithm: fixed_window
"#;
        let rules = TierRules::from_yaml(yaml).unwrap();
        assert_eq!(rules.tiers.len(), 2);

        let free = rules.get_tier("free").unwrap();
        assert_eq!(free.algorithm, AlgorithmKind::SlidingWindow);
        assert_eq!(free.window().unwrap(), Duration::from_secs(1));

        let premium = rules.get_tier("premium").unwrap();
        assert_eq!(premium.algorithm, AlgorithmKind::FixedWindow);
        assert_eq!(premium.limit_config().unwrap().window_size(), Duration::from_secs(60));
    }

    #[test]
    fn test_window_must_be_given_once() {
        let both = TierRules::from_yaml(
            "tiers:\n  t:\n    max_requests: 1\n    window_size: 1.0\n    unit: second\n",
        )
        .unwrap();
        assert!(both.get_tier("t").unwrap().limit_config().is_err());

        let neither = TierRules::from_yaml("tiers:\n  t:\n    max_requests: 1\n").unwrap();
        assert!(neither.get_tier("t").unwrap().limit_config().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero = TierRules::from_yaml("tiers:\n  t:\n    max_requests: 0\n    unit: hour\n").unwrap();
        assert!(zero.get_tier("t").unwrap().limit_config().is_err());

        let negative =
            TierRules::from_yaml("tiers:\n  t:\n    max_requests: 3\n    window_size: -2\n").unwrap();
        assert!(negative.get_tier("t").unwrap().limit_config().is_err());
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = TierRules::from_yaml("tiers: [not, a, map]").unwrap_err();
        assert!(matches!(err, RatekeeperError::Config(_)));

        let err = TierRules::from_yaml("tiers:\n  t:\n    max_requests: 1\n    unit: fortnight\n").unwrap_err();
        assert!(matches!(err, RatekeeperError::Config(_)));
    }

    #[tokio::test]
    async fn test_token_bucket_parameters() {
        let yaml = r#"
tiers:
  burst:
    max_requests: 3
    window_size: 1.0
    algorithm: token_bucket
    capacity: 5
    refill_rate: 0
"#;
        let rules = TierRules::from_yaml(yaml).unwrap();
        let limiter = rules.get_tier("burst").unwrap().build_limiter(ManualClock::shared()).unwrap();

        assert_eq!(limiter.algorithm(), AlgorithmKind::TokenBucket);
        for _ in 0..5 {
            assert!(limiter.check_rate_limit("k").await);
        }
        assert!(!limiter.check_rate_limit("k").await);
    }

    #[test]
    fn test_bucket_parameters_require_token_bucket() {
        let yaml = "tiers:\n  t:\n    max_requests: 3\n    window_size: 1.0\n    capacity: 5\n";
        let rules = TierRules::from_yaml(yaml).unwrap();
        assert!(rules.get_tier("t").unwrap().build_limiter(ManualClock::shared()).is_err());
    }
}
