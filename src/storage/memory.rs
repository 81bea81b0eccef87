//! In-memory store and cache.
//!
//! Used when no `sql_url` / `redis_url` is configured, and by the tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::{BufferStore, FreshnessCache, StorageError};
use crate::buffer::{Buffer, BufferKind};
use crate::clock::{add_millis, Clock, SystemClock};

/// Buffers keyed by `user_id`. The map's per-key entry lock closes the
/// check-then-act window of an upsert.
pub struct MemoryBufferStore {
    data: DashMap<String, Buffer>,
}

impl MemoryBufferStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for MemoryBufferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BufferStore for MemoryBufferStore {
    async fn upsert(
        &self,
        user_id: &str,
        kind: BufferKind,
        payload: &[u8],
        now: i64,
        lifetime: Duration,
    ) -> Result<i64, StorageError> {
        let expires_at = add_millis(now, lifetime);

        match self.data.entry(user_id.to_string()) {
            Entry::Occupied(mut existing) => {
                let buffer = existing.get_mut();
                buffer.kind = kind;
                buffer.payload = payload.to_vec();
                buffer.created_at = now;
                buffer.expires_at = expires_at;
            }
            Entry::Vacant(slot) => {
                slot.insert(Buffer::new(user_id, kind, payload.to_vec(), now, expires_at));
            }
        }

        Ok(expires_at)
    }

    async fn fetch_latest(&self, user_id: &str, now: i64) -> Result<Buffer, StorageError> {
        let buffer = self
            .data
            .get(user_id)
            .map(|r| r.value().clone())
            .ok_or(StorageError::NotFound)?;

        if buffer.is_expired(now) {
            return Err(StorageError::Expired);
        }
        Ok(buffer)
    }

    async fn sweep(&self, now: i64) -> Result<u64, StorageError> {
        let mut removed = 0u64;
        self.data.retain(|_, buffer| {
            let keep = buffer.expires_at >= now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn count_for_user(&self, user_id: &str) -> Result<u64, StorageError> {
        Ok(u64::from(self.data.contains_key(user_id)))
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}

/// TTL-bearing map of user → `expires_at`, evaluated against a [`Clock`].
pub struct MemoryFreshnessCache {
    entries: DashMap<String, (i64, i64)>,
    clock: Arc<dyn Clock>,
}

impl MemoryFreshnessCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop every entry, as a process restart would.
    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryFreshnessCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FreshnessCache for MemoryFreshnessCache {
    async fn set(&self, user_id: &str, expires_at: i64, ttl: Duration) -> Result<(), StorageError> {
        let deadline = add_millis(self.clock.now_millis(), ttl);
        self.entries.insert(user_id.to_string(), (expires_at, deadline));
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<i64>, StorageError> {
        let now = self.clock.now_millis();
        let hit = self.entries.get(user_id).map(|r| *r.value());

        match hit {
            Some((value, deadline)) if now < deadline => Ok(Some(value)),
            Some(_) => {
                // Lazy expiry; only remove if nobody refreshed it meanwhile
                self.entries.remove_if(user_id, |_, (_, deadline)| now >= *deadline);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
