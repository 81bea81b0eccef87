use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::buffer::{Buffer, BufferKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("No buffer found")]
    NotFound,
    #[error("Buffer expired")]
    Expired,
    #[error("Deadline exceeded for '{operation}'")]
    Timeout { operation: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// `NotFound` and `Expired` both mean "no current buffer" to a reader.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound | Self::Expired)
    }
}

/// Durable single-slot-per-user buffer store.
///
/// Time is always passed in by the caller; implementations never read a clock.
#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Insert the user's first buffer or overwrite the existing one in place.
    ///
    /// Must be atomic per `user_id`: concurrent upserts for the same user
    /// leave exactly one row carrying one of the written payloads.
    /// Returns the new `expires_at` (`now + lifetime`).
    async fn upsert(
        &self,
        user_id: &str,
        kind: BufferKind,
        payload: &[u8],
        now: i64,
        lifetime: Duration,
    ) -> Result<i64, StorageError>;

    /// The user's current buffer. `NotFound` if there is no row, `Expired`
    /// if the row exists but `now` is past its `expires_at`.
    async fn fetch_latest(&self, user_id: &str, now: i64) -> Result<Buffer, StorageError>;

    /// Delete every row with `expires_at < now`. Returns the number removed.
    async fn sweep(&self, now: i64) -> Result<u64, StorageError>;

    /// Physical rows held for a user, expired or not.
    async fn count_for_user(&self, user_id: &str) -> Result<u64, StorageError>;

    /// Physical rows held in total.
    async fn count_all(&self) -> Result<u64, StorageError>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Advisory user → last-issued `expires_at` index.
///
/// Never a source of truth: a missing or stale entry only costs a store read.
#[async_trait]
pub trait FreshnessCache: Send + Sync {
    async fn set(&self, user_id: &str, expires_at: i64, ttl: Duration) -> Result<(), StorageError>;

    /// `Ok(None)` means unknown.
    async fn get(&self, user_id: &str) -> Result<Option<i64>, StorageError>;

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
