// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Verified caller identity.
//!
//! The session service (outside this crate) authenticates a request and
//! hands the engine a [`Session`]. The engine only ever reads `user_id`.

use serde::{Deserialize, Serialize};

/// Decoded, already-verified session claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    /// Token issue time (epoch millis)
    pub issued_at: i64,
    /// Token expiry (epoch millis)
    pub expires_at: i64,
}

impl Session {
    /// A session with no meaningful validity window, for trusted callers and tests.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            issued_at: 0,
            expires_at: i64::MAX,
        }
    }

    pub fn with_validity(user_id: impl Into<String>, issued_at: i64, expires_at: i64) -> Self {
        Self {
            user_id: user_id.into(),
            issued_at,
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_never_expires() {
        let session = Session::new("alice");
        assert_eq!(session.user_id, "alice");
        assert!(!session.is_expired(i64::MAX - 1));
    }

    #[test]
    fn test_validity_window() {
        let session = Session::with_validity("bob", 1_000, 2_000);
        assert!(!session.is_expired(2_000));
        assert!(session.is_expired(2_001));
    }
}
