//! Tier routing: one independent rate limiter per tier label.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::algorithm::{AlgorithmKind, RateLimitStats};
use super::backend::RateLimiterBackend;
use super::clock::{system_clock, Clock};
use super::limiter::{RateLimitConfig, RateLimiter};
use super::rules::TierRules;
use crate::error::{RatekeeperError, Result};

/// Routes each check to the [`RateLimiter`] registered for a tier label
/// such as `"free"` or `"premium"`.
///
/// Tiers partition state: usage of a key under one tier never counts
/// against the same key under another tier.
#[derive(Debug, Clone)]
pub struct TieredRateLimiter {
    tiers: HashMap<String, Arc<RateLimiter>>,
}

impl TieredRateLimiter {
    /// Create a tiered limiter using the sliding window algorithm for every
    /// tier.
    pub fn new(tiers: HashMap<String, RateLimitConfig>) -> Result<Self> {
        Self::with_algorithm(tiers, AlgorithmKind::SlidingWindow)
    }

    /// Create a tiered limiter using `kind` for every tier.
    pub fn with_algorithm(tiers: HashMap<String, RateLimitConfig>, kind: AlgorithmKind) -> Result<Self> {
        let clock = system_clock();
        Self::from_limiters(
            tiers
                .into_iter()
                .map(|(tier, config)| (tier, RateLimiter::with_clock(config, kind, clock.clone())))
                .collect(),
        )
    }

    /// Build the tiers described by loaded rules.
    pub fn from_rules(rules: &TierRules) -> Result<Self> {
        Self::from_rules_with_clock(rules, system_clock())
    }

    /// Build the tiers described by loaded rules, reading time from `clock`.
    pub fn from_rules_with_clock(rules: &TierRules, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut limiters = HashMap::with_capacity(rules.tiers.len());
        for (tier, rule) in &rules.tiers {
            let limiter = rule
                .build_limiter(clock.clone())
                .map_err(|e| RatekeeperError::InvalidConfig(format!("tier '{}': {}", tier, e)))?;
            limiters.insert(tier.clone(), limiter);
        }
        Self::from_limiters(limiters)
    }

    /// Assemble a tiered limiter from pre-built limiters.
    pub fn from_limiters(limiters: HashMap<String, RateLimiter>) -> Result<Self> {
        if limiters.is_empty() {
            return Err(RatekeeperError::InvalidConfig(
                "at least one tier is required".to_string(),
            ));
        }
        if let Some(tier) = limiters.keys().find(|tier| tier.trim().is_empty()) {
            return Err(RatekeeperError::InvalidConfig(format!(
                "tier names must not be blank, got '{}'",
                tier
            )));
        }

        for (tier, limiter) in &limiters {
            info!(
                tier = %tier,
                max_requests = limiter.config().max_requests(),
                window = ?limiter.config().window_size(),
                algorithm = %limiter.algorithm(),
                "Registered rate limit tier"
            );
        }

        Ok(Self {
            tiers: limiters
                .into_iter()
                .map(|(tier, limiter)| (tier, Arc::new(limiter)))
                .collect(),
        })
    }

    fn tier(&self, tier: &str) -> Result<&Arc<RateLimiter>> {
        self.tiers.get(tier).ok_or_else(|| {
            warn!(tier = %tier, "Unknown rate limit tier requested");
            RatekeeperError::UnknownTier(tier.to_string())
        })
    }

    /// Check the rate limit for `key` under `tier`.
    pub async fn check_rate_limit(&self, key: &str, tier: &str) -> Result<bool> {
        Ok(self.tier(tier)?.check_rate_limit(key).await)
    }

    /// Usage stats for `key` under `tier`.
    pub fn get_stats(&self, key: &str, tier: &str) -> Result<RateLimitStats> {
        Ok(self.tier(tier)?.get_stats(key))
    }

    /// Clear the state of `key` under `tier` only.
    pub fn reset(&self, key: &str, tier: &str) -> Result<()> {
        self.tier(tier)?.reset(key);
        Ok(())
    }

    /// Clear the state of `key` under every tier.
    pub fn reset_all(&self, key: &str) {
        debug!(key = %key, "Resetting key across all tiers");
        for limiter in self.tiers.values() {
            limiter.reset(key);
        }
    }

    /// Drop idle state in every tier.
    pub fn purge_idle(&self) -> usize {
        self.tiers.values().map(|limiter| limiter.purge_idle()).sum()
    }

    /// A handle bound to one tier, usable wherever a [`RateLimiterBackend`]
    /// is expected.
    pub fn limiter(&self, tier: &str) -> Result<TierLimiter> {
        Ok(TierLimiter {
            tier: tier.to_string(),
            limiter: self.tier(tier)?.clone(),
        })
    }

    /// Registered tier names, sorted.
    pub fn tiers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tiers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains_tier(&self, tier: &str) -> bool {
        self.tiers.contains_key(tier)
    }
}

/// A [`RateLimiter`] resolved from a [`TieredRateLimiter`] for one tier.
#[derive(Debug, Clone)]
pub struct TierLimiter {
    tier: String,
    limiter: Arc<RateLimiter>,
}

impl TierLimiter {
    pub fn tier(&self) -> &str {
        &self.tier
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl RateLimiterBackend for TierLimiter {
    async fn check_rate_limit(&self, key: &str, hits: u32) -> bool {
        self.limiter.check_rate_limit_hits(key, hits).await
    }

    fn get_stats(&self, key: &str) -> RateLimitStats {
        self.limiter.get_stats(key)
    }
}
