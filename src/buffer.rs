// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Buffer data model.
//!
//! A [`Buffer`] is the single current clipboard value stored for a user.
//! There is at most one live buffer per `user_id`; every push overwrites it
//! in place and keeps its `id`.
//!
//! # Example
//!
//! ```
//! use clip_sync::{Buffer, BufferKind};
//!
//! let buffer = Buffer::new("alice", BufferKind::Text, b"hello".to_vec(), 1_000, 61_000);
//!
//! assert_eq!(buffer.user_id, "alice");
//! assert!(!buffer.is_expired(61_000)); // still live at its expiry instant
//! assert!(buffer.is_expired(61_001));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a buffer holds. Stored as `"text"` / `"image"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    Text,
    Image,
}

impl BufferKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }

    /// Map a push request's content type to a kind.
    ///
    /// Only the two content types the push routes accept are recognised.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or("").trim();
        match mime {
            "text/plain" => Some(Self::Text),
            "application/octet-stream" => Some(Self::Image),
            _ => None,
        }
    }

    /// Content type a transport adapter should answer a pull with.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Image => "application/octet-stream",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BufferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            other => Err(format!("unknown buffer kind '{}'", other)),
        }
    }
}

/// The persisted row: `{id, user_id, created_at, expires_at, kind, payload}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    /// Assigned on first push, reused by every later upsert for the user
    pub id: String,
    pub user_id: String,
    /// Time of the most recent write (epoch millis)
    pub created_at: i64,
    /// Absolute expiry (epoch millis)
    pub expires_at: i64,
    pub kind: BufferKind,
    pub payload: Vec<u8>,
}

impl Buffer {
    /// Create a buffer with a freshly generated id.
    pub fn new(
        user_id: impl Into<String>,
        kind: BufferKind,
        payload: Vec<u8>,
        created_at: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            created_at,
            expires_at,
            kind,
            payload,
        }
    }

    /// A buffer is logically absent once `now` is past `expires_at`.
    #[must_use]
    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }

    /// The caller-facing part of the row.
    #[must_use]
    pub fn into_snapshot(self) -> BufferSnapshot {
        BufferSnapshot {
            payload: self.payload,
            kind: self.kind,
            expires_at: self.expires_at,
        }
    }
}

/// What a successful pull hands back to the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub payload: Vec<u8>,
    pub kind: BufferKind,
    pub expires_at: i64,
}
