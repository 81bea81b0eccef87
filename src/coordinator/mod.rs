// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] ties the pieces together:
//! - the durable [`BufferStore`](crate::storage::traits::BufferStore), one slot per user
//! - the advisory [`FreshnessCache`](crate::storage::traits::FreshnessCache), behind a circuit breaker
//! - the [`ExpirySweeper`](crate::sweeper::ExpirySweeper) background task
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use clip_sync::{BufferKind, EngineState, PullOutcome, Session, SyncConfig, SyncContext, SyncEngine};
//! use clip_sync::clock::ManualClock;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ctx = SyncContext::in_memory(Arc::new(ManualClock::new(0)));
//! let engine = SyncEngine::new(SyncConfig::default(), ctx);
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! let alice = Session::new("alice");
//! let expires_at = engine.push(&alice, BufferKind::Text, b"hello").await.unwrap();
//!
//! let outcome = engine.pull(&alice, Some(expires_at)).await.unwrap();
//! assert_eq!(outcome, PullOutcome::NotModified);
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{EngineState, HealthCheck, PullOutcome, SyncError};

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::deadline::with_deadline;

/// Handle on the running sweeper task.
pub(super) struct SweeperTask {
    pub(super) shutdown: watch::Sender<bool>,
    pub(super) handle: JoinHandle<()>,
}

/// Main sync engine coordinator.
///
/// Holds no locks of its own around request handling; per-user exclusion is
/// the store's atomic upsert. `Send + Sync`, share it behind an `Arc`.
pub struct SyncEngine {
    pub(super) config: SyncConfig,

    /// Store, cache and clock handles
    pub(super) ctx: SyncContext,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Open breaker = skip the cache, read the store
    pub(super) cache_breaker: CircuitBreaker,

    /// Background sweeper, present while running
    pub(super) sweeper: Mutex<Option<SweeperTask>>,
}

impl SyncEngine {
    /// Create an engine over explicit backends.
    ///
    /// The engine starts in `Created` and already serves push and pull. Call
    /// [`start()`](Self::start) to run the expiry sweeper.
    pub fn new(config: SyncConfig, ctx: SyncContext) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);

        Self {
            config,
            ctx,
            state: state_tx,
            state_rx,
            cache_breaker: CircuitBreaker::with_defaults("freshness_cache"),
            sweeper: Mutex::new(None),
        }
    }

    /// Validate `config`, connect the backends it names, and build an engine.
    pub async fn connect(config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let ctx = SyncContext::connect(&config).await?;
        Ok(Self::new(config, ctx))
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Whether push and pull are being served.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        matches!(self.state(), EngineState::Created | EngineState::Running)
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    #[must_use]
    pub fn cache_circuit_state(&self) -> CircuitState {
        self.cache_breaker.state()
    }

    pub(super) fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
        crate::metrics::set_engine_state(&state.to_string());
        debug!(%state, "Engine state changed");
    }

    /// Probe both backends in parallel and collect a [`HealthCheck`].
    ///
    /// The cache probe bypasses the circuit breaker so a recovered Redis is
    /// reported as soon as it answers.
    ///
    /// ```rust,ignore
    /// let health = engine.health_check().await;
    ///
    /// // For /ready endpoint (load balancer)
    /// if health.healthy {
    ///     HttpResponse::Ok().body("ready")
    /// } else {
    ///     HttpResponse::ServiceUnavailable().body("not ready")
    /// }
    /// ```
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();

        let (store_latency_ms, cache_latency_ms) = tokio::join!(
            self.probe_store(),
            self.probe_cache()
        );
        let store_healthy = store_latency_ms.is_some();
        let cache_healthy = cache_latency_ms.is_some();

        crate::metrics::set_backend_healthy("store", store_healthy);
        crate::metrics::set_backend_healthy("cache", cache_healthy);

        let healthy = store_healthy
            && matches!(state, EngineState::Created | EngineState::Running);

        HealthCheck {
            state,
            store_healthy,
            cache_healthy,
            store_latency_ms,
            cache_latency_ms,
            healthy,
        }
    }

    /// Ping latency in ms, `None` when the store is unreachable.
    async fn probe_store(&self) -> Option<u64> {
        let start = Instant::now();
        with_deadline("store", "ping", self.probe_timeout(), self.ctx.store.ping())
            .await
            .ok()
            .map(|()| start.elapsed().as_millis() as u64)
    }

    async fn probe_cache(&self) -> Option<u64> {
        let start = Instant::now();
        with_deadline("cache", "ping", self.probe_timeout(), self.ctx.cache.ping())
            .await
            .ok()
            .map(|()| start.elapsed().as_millis() as u64)
    }

    fn probe_timeout(&self) -> Duration {
        self.config.operation_timeout()
    }
}
