//! Shared handles passed to the engine and the sweeper.
//!
//! Built once at startup and handed out by `Arc` clone; nothing in the crate
//! reaches for a global connection.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::storage::memory::{MemoryBufferStore, MemoryFreshnessCache};
use crate::storage::redis::RedisFreshnessCache;
use crate::storage::sql::SqlBufferStore;
use crate::storage::traits::{BufferStore, FreshnessCache, StorageError};

#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn BufferStore>,
    pub cache: Arc<dyn FreshnessCache>,
    pub clock: Arc<dyn Clock>,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn BufferStore>,
        cache: Arc<dyn FreshnessCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, cache, clock }
    }

    /// In-memory store and cache, both driven by `clock`.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(MemoryBufferStore::new()),
            cache: Arc::new(MemoryFreshnessCache::with_clock(clock.clone())),
            clock,
        }
    }

    /// Connect the backends named in `config`.
    ///
    /// The store is required: a bad `sql_url` fails the whole connect. A
    /// Redis that cannot be reached degrades to the in-memory cache, since
    /// the cache only ever saves store reads.
    pub async fn connect(config: &SyncConfig) -> Result<Self, StorageError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn BufferStore> = match config.sql_url.as_deref() {
            Some(url) => {
                info!("Connecting buffer store (SQL)");
                match SqlBufferStore::new(url).await {
                    Ok(store) => {
                        crate::metrics::set_backend_healthy("sql", true);
                        Arc::new(store)
                    }
                    Err(e) => {
                        crate::metrics::set_backend_healthy("sql", false);
                        return Err(e);
                    }
                }
            }
            None => {
                warn!("No SQL URL configured, buffers are kept in memory only");
                Arc::new(MemoryBufferStore::new())
            }
        };

        let cache: Arc<dyn FreshnessCache> = match config.redis_url.as_deref() {
            Some(url) => {
                info!(prefix = ?config.redis_prefix, "Connecting freshness cache (Redis)");
                match RedisFreshnessCache::with_prefix(url, config.redis_prefix.as_deref()).await {
                    Ok(cache) => {
                        crate::metrics::set_backend_healthy("redis", true);
                        Arc::new(cache)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to connect to Redis, using in-memory freshness cache");
                        crate::metrics::set_backend_healthy("redis", false);
                        Arc::new(MemoryFreshnessCache::with_clock(clock.clone()))
                    }
                }
            }
            None => Arc::new(MemoryFreshnessCache::with_clock(clock.clone())),
        };

        Ok(Self { store, cache, clock })
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_context_shares_clock() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = SyncContext::in_memory(clock.clone());

        assert_eq!(ctx.now(), 1_000);
        clock.advance(Duration::from_secs(1));
        assert_eq!(ctx.now(), 2_000);
    }

    #[tokio::test]
    async fn test_connect_without_urls_is_in_memory() {
        let ctx = SyncContext::connect(&SyncConfig::default()).await.unwrap();

        let expires_at = ctx
            .store
            .upsert("alice", BufferKind::Text, b"hi", 0, Duration::from_secs(5))
            .await
            .unwrap();
        ctx.cache.set("alice", expires_at, Duration::from_secs(60)).await.unwrap();

        assert_eq!(ctx.store.count_all().await.unwrap(), 1);
        assert_eq!(ctx.cache.get("alice").await.unwrap(), Some(expires_at));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_sql_url() {
        let config = SyncConfig {
            sql_url: Some("nosuchdb://localhost/clip".into()),
            ..Default::default()
        };

        assert!(SyncContext::connect(&config).await.is_err());
    }
}
