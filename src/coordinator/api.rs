//! Push and pull: the request-path API of the engine.

use tracing::{debug, warn};

use crate::buffer::BufferKind;
use crate::resilience::circuit_breaker::CircuitError;
use crate::resilience::deadline::with_deadline;
use crate::session::Session;
use crate::storage::traits::StorageError;

use super::{PullOutcome, SyncEngine, SyncError};

fn error_kind(err: &StorageError) -> &'static str {
    match err {
        StorageError::NotFound => "not_found",
        StorageError::Expired => "expired",
        StorageError::Timeout { .. } => "timeout",
        StorageError::Backend(_) => "backend",
    }
}

impl SyncEngine {
    /// Store `payload` as the caller's current buffer and return its new
    /// `expires_at` (epoch millis).
    ///
    /// The size ceiling is checked before any store call. The freshness cache
    /// is only updated after the store confirms the write, so a failed or
    /// timed-out push never advances freshness.
    #[tracing::instrument(
        skip(self, session, payload),
        fields(user_id = %session.user_id, kind = %kind, size = payload.len())
    )]
    pub async fn push(
        &self,
        session: &Session,
        kind: BufferKind,
        payload: &[u8],
    ) -> Result<i64, SyncError> {
        if !self.is_accepting() {
            crate::metrics::record_push("rejected");
            return Err(SyncError::NotRunning);
        }

        let max = self.config.max_payload_bytes;
        if payload.len() > max {
            debug!(max, "Payload over ceiling, rejecting");
            crate::metrics::record_push("too_large");
            return Err(SyncError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        let user_id = session.user_id.as_str();
        let now = self.ctx.now();

        let upserted = {
            let _timer = crate::time_operation!("store", "upsert");
            with_deadline(
                "store",
                "upsert",
                self.config.operation_timeout(),
                self.ctx.store.upsert(user_id, kind, payload, now, self.config.buffer_lifetime()),
            )
            .await
        };

        let expires_at = match upserted {
            Ok(expires_at) => expires_at,
            Err(e) => {
                warn!(error = %e, "Upsert failed, freshness cache left untouched");
                crate::metrics::record_error("store", "upsert", error_kind(&e));
                crate::metrics::record_push("store_error");
                return Err(SyncError::Store(e));
            }
        };

        self.remember_freshness(user_id, expires_at).await;

        crate::metrics::record_push("success");
        crate::metrics::record_payload_bytes(kind.as_str(), payload.len());
        debug!(expires_at, "Buffer pushed");
        Ok(expires_at)
    }

    /// Fetch the caller's current buffer unless they already have it.
    ///
    /// `client_known` is the `expires_at` the client last received. When it
    /// is present and non-zero and the cached freshness is `<=` it, the
    /// answer is [`PullOutcome::NotModified`] and the store is not read. An
    /// equal value counts as up to date. A cached value already in the past
    /// never short-circuits, so an expired buffer reads as
    /// [`PullOutcome::Empty`].
    #[tracing::instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn pull(
        &self,
        session: &Session,
        client_known: Option<i64>,
    ) -> Result<PullOutcome, SyncError> {
        if !self.is_accepting() {
            crate::metrics::record_pull("rejected");
            return Err(SyncError::NotRunning);
        }

        let user_id = session.user_id.as_str();
        let now = self.ctx.now();

        if let Some(known) = client_known.filter(|&known| known != 0) {
            if let Some(cached) = self.known_freshness(user_id).await {
                // A cache entry can outlive the buffer it describes.
                if cached <= known && now <= cached {
                    debug!(cached, known, "Client is up to date, skipping store read");
                    crate::metrics::record_pull(PullOutcome::NotModified.as_str());
                    return Ok(PullOutcome::NotModified);
                }
            }
        }

        let fetched = {
            let _timer = crate::time_operation!("store", "fetch");
            with_deadline(
                "store",
                "fetch",
                self.config.operation_timeout(),
                self.ctx.store.fetch_latest(user_id, now),
            )
            .await
        };

        let outcome = match fetched {
            Ok(buffer) => {
                self.remember_freshness(user_id, buffer.expires_at).await;
                PullOutcome::Fresh(buffer.into_snapshot())
            }
            Err(e) if e.is_absent() => {
                debug!(reason = %e, "No live buffer");
                PullOutcome::Empty
            }
            Err(e) => {
                warn!(error = %e, "Fetch failed");
                crate::metrics::record_error("store", "fetch", error_kind(&e));
                crate::metrics::record_pull("store_error");
                return Err(SyncError::Store(e));
            }
        };

        crate::metrics::record_pull(outcome.as_str());
        Ok(outcome)
    }

    /// Cached `expires_at` for the user. Errors, timeouts and an open breaker
    /// all read as "unknown".
    async fn known_freshness(&self, user_id: &str) -> Option<i64> {
        let _timer = crate::time_operation!("cache", "get");
        let timeout = self.config.operation_timeout();

        let result = self
            .cache_breaker
            .call(|| with_deadline("cache", "get", timeout, self.ctx.cache.get(user_id)))
            .await;

        match result {
            Ok(Some(expires_at)) => {
                crate::metrics::record_cache_lookup("hit");
                Some(expires_at)
            }
            Ok(None) => {
                debug!("Freshness cache miss");
                crate::metrics::record_cache_lookup("miss");
                None
            }
            Err(CircuitError::Rejected) => {
                debug!("Freshness cache circuit open, treating as miss");
                crate::metrics::record_cache_lookup("rejected");
                None
            }
            Err(CircuitError::Inner(e)) => {
                warn!(error = %e, "Freshness cache lookup failed, treating as miss");
                crate::metrics::record_cache_lookup("error");
                crate::metrics::record_error("cache", "get", error_kind(&e));
                None
            }
        }
    }

    /// Best-effort cache write; failures are logged and swallowed.
    async fn remember_freshness(&self, user_id: &str, expires_at: i64) {
        let _timer = crate::time_operation!("cache", "set");
        let timeout = self.config.operation_timeout();
        let ttl = self.config.cache_ttl();

        let result = self
            .cache_breaker
            .call(|| with_deadline("cache", "set", timeout, self.ctx.cache.set(user_id, expires_at, ttl)))
            .await;

        match result {
            Ok(()) => {}
            Err(CircuitError::Rejected) => {
                debug!("Freshness cache circuit open, skipping set");
            }
            Err(CircuitError::Inner(e)) => {
                warn!(error = %e, "Freshness cache update failed");
                crate::metrics::record_error("cache", "set", error_kind(&e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::BufferKind;
    use crate::clock::{Clock, ManualClock};
    use crate::config::SyncConfig;
    use crate::context::SyncContext;
    use crate::session::Session;
    use crate::{PullOutcome, SyncEngine, SyncError};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine_at(start: i64) -> (SyncEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let ctx = SyncContext::in_memory(clock.clone());
        (SyncEngine::new(SyncConfig::default(), ctx), clock)
    }

    #[tokio::test]
    async fn test_push_returns_now_plus_lifetime() {
        let (engine, _clock) = engine_at(10_000);
        let expires_at = engine.push(&Session::new("alice"), BufferKind::Text, b"hello").await.unwrap();
        assert_eq!(expires_at, 10_000 + 300_000);
    }

    #[tokio::test]
    async fn test_pull_without_client_value_reads_store() {
        let (engine, _clock) = engine_at(0);
        let alice = Session::new("alice");
        let expires_at = engine.push(&alice, BufferKind::Image, &[1, 2, 3]).await.unwrap();

        match engine.pull(&alice, None).await.unwrap() {
            PullOutcome::Fresh(snapshot) => {
                assert_eq!(snapshot.payload, vec![1, 2, 3]);
                assert_eq!(snapshot.kind, BufferKind::Image);
                assert_eq!(snapshot.expires_at, expires_at);
            }
            other => panic!("expected fresh buffer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_client_value_means_unknown() {
        let (engine, _clock) = engine_at(0);
        let alice = Session::new("alice");
        engine.push(&alice, BufferKind::Text, b"x").await.unwrap();

        assert!(matches!(engine.pull(&alice, Some(0)).await.unwrap(), PullOutcome::Fresh(_)));
    }

    #[tokio::test]
    async fn test_pull_for_unknown_user_is_empty() {
        let (engine, _clock) = engine_at(0);
        let outcome = engine.pull(&Session::new("nobody"), Some(12345)).await.unwrap();
        assert_eq!(outcome, PullOutcome::Empty);
    }

    #[tokio::test]
    async fn test_payload_at_ceiling_is_accepted() {
        let clock = Arc::new(ManualClock::new(0));
        let config = SyncConfig {
            max_payload_bytes: 4,
            ..Default::default()
        };
        let engine = SyncEngine::new(config, SyncContext::in_memory(clock));
        let bob = Session::new("bob");

        assert!(engine.push(&bob, BufferKind::Text, b"abcd").await.is_ok());
        assert_eq!(
            engine.push(&bob, BufferKind::Text, b"abcde").await,
            Err(SyncError::PayloadTooLarge { size: 5, max: 4 })
        );
    }

    #[tokio::test]
    async fn test_newer_push_is_not_hidden_by_cache() {
        let (engine, clock) = engine_at(0);
        let alice = Session::new("alice");
        let first = engine.push(&alice, BufferKind::Text, b"one").await.unwrap();

        clock.advance(Duration::from_millis(5));
        engine.push(&alice, BufferKind::Text, b"two").await.unwrap();

        match engine.pull(&alice, Some(first)).await.unwrap() {
            PullOutcome::Fresh(snapshot) => assert_eq!(snapshot.payload, b"two".to_vec()),
            other => panic!("expected fresh buffer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_buffer_is_empty_even_when_client_is_current() {
        let clock = Arc::new(ManualClock::new(0));
        let config = SyncConfig {
            buffer_lifetime_secs: 60,
            ..Default::default()
        };
        let engine = SyncEngine::new(config, SyncContext::in_memory(clock.clone()));
        let bob = Session::new("bob");
        let expires_at = engine.push(&bob, BufferKind::Text, b"x").await.unwrap();

        assert_eq!(engine.pull(&bob, Some(expires_at)).await.unwrap(), PullOutcome::NotModified);

        clock.advance(Duration::from_secs(61));
        assert_eq!(engine.pull(&bob, Some(expires_at)).await.unwrap(), PullOutcome::Empty);
    }

    #[tokio::test]
    async fn test_cache_rearmed_by_pull_does_not_outlive_buffer() {
        let (engine, clock) = engine_at(0);
        let alice = Session::new("alice");
        let expires_at = engine.push(&alice, BufferKind::Text, b"x").await.unwrap();

        // A fresh pull late in the lifetime re-arms the cache past expiry
        clock.advance(Duration::from_secs(200));
        assert!(matches!(engine.pull(&alice, None).await.unwrap(), PullOutcome::Fresh(_)));

        clock.advance(Duration::from_secs(200));
        assert!(clock.now_millis() > expires_at);
        assert_eq!(engine.pull(&alice, Some(expires_at)).await.unwrap(), PullOutcome::Empty);
    }
}
