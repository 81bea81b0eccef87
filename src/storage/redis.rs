// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis freshness cache.
//!
//! One string key per user holding the last-issued `expires_at` (epoch
//! millis), written with its own TTL so a stale entry expires on its own:
//!
//! ```text
//! SET clip:fresh:alice 1767084957058 PX 300000
//! GET clip:fresh:alice
//! ```

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, AsyncCommands, Client};
use tracing::warn;

use super::traits::{FreshnessCache, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisFreshnessCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:fresh:alice")
    prefix: String,
}

impl RedisFreshnessCache {
    /// Create a new cache without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Create a new cache with an optional key prefix.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use clip_sync::storage::redis::RedisFreshnessCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be "clip:fresh:<user_id>"
    /// let cache = RedisFreshnessCache::with_prefix("redis://localhost", Some("clip:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Use startup config: fast-fail, don't hang forever
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StorageError::Backend(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn freshness_key(&self, user_id: &str) -> String {
        format!("{}fresh:{}", self.prefix, user_id)
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl FreshnessCache for RedisFreshnessCache {
    async fn set(&self, user_id: &str, expires_at: i64, ttl: Duration) -> Result<(), StorageError> {
        let ttl_ms = ttl.as_millis() as u64;
        if ttl_ms == 0 {
            // PX 0 is rejected by Redis; a zero TTL means "don't cache"
            return Ok(());
        }

        let key = self.freshness_key(user_id);
        let mut conn = self.connection.clone();

        let _: () = cmd("SET")
            .arg(&key)
            .arg(expires_at)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<i64>, StorageError> {
        let key = self.freshness_key(user_id);
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(raw.and_then(|value| match value.parse::<i64>() {
            Ok(expires_at) => Some(expires_at),
            Err(_) => {
                warn!(key = %key, value = %value, "Unparsable freshness entry, treating as absent");
                None
            }
        }))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
