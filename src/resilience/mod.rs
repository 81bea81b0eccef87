//! Resilience helpers for backend calls.
//!
//! - [`retry`]: exponential backoff for transient failures
//! - [`deadline`]: per-call timeouts
//! - [`circuit_breaker`]: fail-fast in front of the freshness cache

pub mod circuit_breaker;
pub mod deadline;
pub mod retry;
