//! Public types for the sync engine coordinator.

use serde::Serialize;
use thiserror::Error;

use crate::buffer::BufferSnapshot;
use crate::config::ConfigError;
use crate::storage::traits::StorageError;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Built, sweeper not started. Push and pull already work.
    Created,
    /// Sweeper running
    Running,
    /// Shutdown signalled, waiting for the sweeper
    ShuttingDown,
    /// Shut down; push and pull are refused
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of a pull.
///
/// A transport adapter maps these onto distinct responses (e.g. 304, 204, 200).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The client already has the freshest known buffer; the store was not read
    NotModified,
    /// No live buffer for this user
    Empty,
    /// The current buffer
    Fresh(BufferSnapshot),
}

impl PullOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotModified => "not_modified",
            Self::Empty => "empty",
            Self::Fresh(_) => "fresh",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("store error: {0}")]
    Store(#[from] StorageError),

    #[error("engine is not running")]
    NotRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Snapshot of engine health, for readiness and diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub state: EngineState,
    pub store_healthy: bool,
    pub cache_healthy: bool,
    /// Store ping round trip, when it succeeded
    pub store_latency_ms: Option<u64>,
    pub cache_latency_ms: Option<u64>,
    /// Store reachable and engine not stopped. The cache never makes the
    /// engine unhealthy; without it pulls just read the store.
    pub healthy: bool,
}
