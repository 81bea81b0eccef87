// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL durable store for clipboard buffers.
//!
//! One row per user, kept unique by a `UNIQUE (user_id)` key:
//! ```sql
//! CREATE TABLE clip_buffers (
//!   id VARCHAR(36) PRIMARY KEY,      -- assigned once, stable across upserts
//!   user_id VARCHAR(255) NOT NULL,   -- UNIQUE
//!   created_at BIGINT NOT NULL,      -- epoch millis of the last write
//!   expires_at BIGINT NOT NULL,      -- epoch millis, indexed for the sweeper
//!   kind VARCHAR(8) NOT NULL,        -- 'text' | 'image'
//!   payload LONGBLOB NOT NULL
//! )
//! ```
//!
//! ## Atomic upsert
//!
//! Upsert is a single `INSERT ... ON CONFLICT(user_id) DO UPDATE` (SQLite) or
//! `INSERT ... ON DUPLICATE KEY UPDATE` (MySQL). The database serializes
//! concurrent writers on the unique key, so two racing pushes for the same
//! user can never produce two rows, and the conflict branch never rewrites
//! `id`. Schemas provisioned outside this crate must carry the same unique key.
//!
//! ## sqlx Any Driver Quirks
//!
//! Text columns can come back as BLOB from MySQL through the `Any` driver, so
//! string columns are read as `String` first and `Vec<u8>` second.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use super::traits::{BufferStore, StorageError};
use crate::buffer::{Buffer, BufferKind};
use crate::clock::add_millis;
use crate::resilience::retry::{retry, retry_if, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlBufferStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlBufferStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// make sure the table exists.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        // A malformed URL will not fix itself; only retry connection failures
        let pool = retry_if(
            "sql_connect",
            &RetryConfig::startup(),
            || async {
                AnyPoolOptions::new()
                    .max_connections(20)
                    .acquire_timeout(Duration::from_secs(10))
                    .idle_timeout(Duration::from_secs(300))
                    .connect(connection_string)
                    .await
            },
            |e: &sqlx::Error| !matches!(e, sqlx::Error::Configuration(_)),
        )
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let store = Self { pool, is_sqlite };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        info!(sqlite = is_sqlite, "SQL buffer store ready");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// WAL lets readers proceed while an upsert holds the write lock.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: &[&str] = if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS clip_buffers (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL UNIQUE,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    payload BLOB NOT NULL
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_clip_buffers_expires_at ON clip_buffers (expires_at)",
            ]
        } else {
            // LONGBLOB: MEDIUMBLOB tops out one byte short of 16 MiB
            &[r#"
                CREATE TABLE IF NOT EXISTS clip_buffers (
                    id VARCHAR(36) PRIMARY KEY,
                    user_id VARCHAR(255) NOT NULL,
                    created_at BIGINT NOT NULL,
                    expires_at BIGINT NOT NULL,
                    kind VARCHAR(8) NOT NULL,
                    payload LONGBLOB NOT NULL,
                    UNIQUE KEY uq_clip_buffers_user_id (user_id),
                    INDEX idx_clip_buffers_expires_at (expires_at)
                )
                "#]
        };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }

        Ok(())
    }

    fn upsert_sql(&self) -> &'static str {
        if self.is_sqlite {
            "INSERT INTO clip_buffers (id, user_id, created_at, expires_at, kind, payload)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                kind = excluded.kind,
                payload = excluded.payload"
        } else {
            "INSERT INTO clip_buffers (id, user_id, created_at, expires_at, kind, payload)
             VALUES (?, ?, ?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                created_at = VALUES(created_at),
                expires_at = VALUES(expires_at),
                kind = VALUES(kind),
                payload = VALUES(payload)"
        }
    }

    /// Read a text column as String (SQLite) or bytes (MySQL via Any).
    fn text_column(row: &AnyRow, column: &str) -> Option<String> {
        row.try_get::<String, _>(column).ok().or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    fn row_to_buffer(row: &AnyRow, user_id: &str) -> Result<Buffer, StorageError> {
        let id = Self::text_column(row, "id")
            .ok_or_else(|| StorageError::Backend("Buffer row has no id".to_string()))?;
        let kind = Self::text_column(row, "kind")
            .ok_or_else(|| StorageError::Backend("Buffer row has no kind".to_string()))?
            .parse::<BufferKind>()
            .map_err(StorageError::Backend)?;
        let created_at: i64 = row.try_get("created_at").unwrap_or(0);
        let expires_at: i64 = row
            .try_get("expires_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let payload: Vec<u8> = row
            .try_get("payload")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(Buffer {
            id,
            user_id: user_id.to_string(),
            created_at,
            expires_at,
            kind,
            payload,
        })
    }

    async fn count(&self, sql: &str, user_id: Option<&str>) -> Result<u64, StorageError> {
        let mut query = sqlx::query(sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id.to_string());
        }

        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let count: i64 = row.try_get("cnt").map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl BufferStore for SqlBufferStore {
    async fn upsert(
        &self,
        user_id: &str,
        kind: BufferKind,
        payload: &[u8],
        now: i64,
        lifetime: Duration,
    ) -> Result<i64, StorageError> {
        let expires_at = add_millis(now, lifetime);
        let sql = self.upsert_sql();
        // Only used when this turns out to be the user's first row
        let new_id = uuid::Uuid::new_v4().to_string();
        let user_id = user_id.to_string();
        let payload = payload.to_vec();

        retry("sql_upsert", &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(&new_id)
                .bind(&user_id)
                .bind(now)
                .bind(expires_at)
                .bind(kind.as_str())
                .bind(&payload)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await?;

        debug!(user_id = %user_id, expires_at, bytes = payload.len(), "Buffer upserted");
        Ok(expires_at)
    }

    async fn fetch_latest(&self, user_id: &str, now: i64) -> Result<Buffer, StorageError> {
        let user_id = user_id.to_string();

        let row = retry("sql_fetch_latest", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT id, created_at, expires_at, kind, payload FROM clip_buffers
                 WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
            )
            .bind(&user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let buffer = match row {
            Some(row) => Self::row_to_buffer(&row, &user_id)?,
            None => return Err(StorageError::NotFound),
        };

        if buffer.is_expired(now) {
            return Err(StorageError::Expired);
        }
        Ok(buffer)
    }

    async fn sweep(&self, now: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM clip_buffers WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count_for_user(&self, user_id: &str) -> Result<u64, StorageError> {
        self.count("SELECT COUNT(*) as cnt FROM clip_buffers WHERE user_id = ?", Some(user_id))
            .await
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        self.count("SELECT COUNT(*) as cnt FROM clip_buffers", None).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
