// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker in front of the freshness cache, using the recloser crate.
//!
//! The cache is advisory, so when Redis is unhealthy the cheapest correct
//! behaviour is to stop asking it: an open breaker rejects the call without a
//! network round trip and the engine treats that as a cache miss.
//!
//! States:
//! - Closed: calls pass through, the error rate is tracked over a ring
//! - Open: calls are rejected until `recovery_timeout` elapses
//! - HalfOpen: a few probe calls decide whether to close again

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use tracing::{debug, warn};

/// Observed breaker state (last call outcome), for metrics and health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The breaker is open and did not run the call
    #[error("circuit breaker open, request rejected")]
    Rejected,

    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failure ratio (0.0-1.0) over the closed window that trips the breaker
    pub error_rate: f32,
    /// Number of recent calls the error rate is computed over
    pub window: usize,
    /// Probe calls allowed while half-open
    pub half_open_probes: usize,
    /// Time spent open before probing again
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            error_rate: 0.5,
            window: 20,
            half_open_probes: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            error_rate: 0.5,
            window: 2,
            half_open_probes: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,
    state: AtomicU8,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.error_rate)
            .closed_len(config.window)
            .half_open_len(config.half_open_probes)
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// recloser does not expose its state, so this reports whether the most
    /// recent call was rejected.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        if self.state.load(Ordering::Relaxed) == CircuitState::Open as u8 {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    fn set_state(&self, state: CircuitState) {
        let previous = self.state.swap(state as u8, Ordering::Relaxed);
        if previous != state as u8 {
            crate::metrics::set_circuit_state(&self.name, state as u8);
        }
    }

    /// Run `f` through the breaker. The future it builds is only polled when
    /// the breaker lets the call through.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.inner.call(f()).await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.set_state(CircuitState::Closed);
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                if self.state() == CircuitState::Closed {
                    warn!(circuit = %self.name, "Circuit breaker opened, short-circuiting calls");
                }
                self.set_state(CircuitState::Open);
                crate::metrics::record_circuit_call(&self.name, "rejected");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit call failed");
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}
