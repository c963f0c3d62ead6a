//! Guarding operations behind a rate limiter.
//!
//! The guard consults its limiter before running an operation. Admitted
//! calls run unchanged; rejected calls fail with
//! [`RatekeeperError::RateLimitExceeded`] and never run. The guard never
//! retries or backs off on the caller's behalf.

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use super::backend::RateLimiterBackend;
use crate::error::{RatekeeperError, Result};

/// Gates operations on a [`RateLimiterBackend`].
#[derive(Debug)]
pub struct RateLimitGuard<B: RateLimiterBackend> {
    backend: Arc<B>,
}

impl<B: RateLimiterBackend> Clone for RateLimitGuard<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: RateLimiterBackend> RateLimitGuard<B> {
    pub fn new(backend: B) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    /// Guard with a backend that is also used elsewhere.
    pub fn from_shared(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Consume one unit for `key`, failing if the limiter rejects it.
    pub async fn admit(&self, key: &str) -> Result<()> {
        if self.backend.check_rate_limit(key, 1).await {
            return Ok(());
        }

        let stats = self.backend.get_stats(key);
        let retry_after = stats.retry_after;
        warn!(
            key = %key,
            limit = stats.limit,
            retry_after = ?retry_after,
            "Rejected rate limited call"
        );
        Err(RatekeeperError::RateLimitExceeded {
            key: key.to_string(),
            stats,
            retry_after,
        })
    }

    /// Run `op` if `key` is admitted and return its output unchanged.
    pub async fn run<F, Fut, T>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.admit(key).await?;
        Ok(op().await)
    }
}

/// An operation wrapped so every call is gated by a rate limiter.
///
/// The key for each call is extracted from the call's argument; pass a
/// tuple to wrap operations taking several arguments.
pub struct RateLimited<B: RateLimiterBackend, K, F> {
    guard: RateLimitGuard<B>,
    key_fn: K,
    op: F,
}

impl<B, K, F> RateLimited<B, K, F>
where
    B: RateLimiterBackend,
{
    /// Call the wrapped operation with `args`.
    pub async fn call<A, Fut, T>(&self, args: A) -> Result<T>
    where
        K: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = T>,
    {
        let key = (self.key_fn)(&args);
        self.guard.admit(&key).await?;
        Ok((self.op)(args).await)
    }

    pub fn guard(&self) -> &RateLimitGuard<B> {
        &self.guard
    }
}

/// Wrap `op` so that its argument is the rate limit key.
pub fn rate_limited<B, F, A, Fut, T>(
    backend: B,
    op: F,
) -> RateLimited<B, fn(&A) -> String, F>
where
    B: RateLimiterBackend,
    A: AsRef<str>,
    F: Fn(A) -> Fut,
    Fut: Future<Output = T>,
{
    fn key_of<A: AsRef<str>>(args: &A) -> String {
        args.as_ref().to_string()
    }

    rate_limited_by(backend, key_of::<A> as fn(&A) -> String, op)
}

/// Wrap `op`, extracting the rate limit key from its argument with `key_fn`.
pub fn rate_limited_by<B, K, F, A, Fut, T>(backend: B, key_fn: K, op: F) -> RateLimited<B, K, F>
where
    B: RateLimiterBackend,
    K: Fn(&A) -> String,
    F: Fn(A) -> Fut,
    Fut: Future<Output = T>,
{
    RateLimited {
        guard: RateLimitGuard::new(backend),
        key_fn,
        op,
    }
}
