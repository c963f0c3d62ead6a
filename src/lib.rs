//! Ratekeeper - In-process Rate Limiting
//!
//! This crate implements per-key admission control with three algorithms
//! (token bucket, sliding window log and fixed window counter), tiered
//! policies keyed by a label such as a subscription level, and a guard layer
//! that turns a rejection into an error carrying retry timing.

pub mod config;
pub mod error;
pub mod ratelimit;
