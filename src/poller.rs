//! Device-side polling loop.
//!
//! A [`SyncPoller`] stands in for one device of a user. It remembers the
//! `expires_at` of the last buffer it saw (its own push or a fresh pull) and
//! sends it with every pull, so unchanged buffers are never downloaded twice.
//!
//! ```rust
//! use std::sync::Arc;
//! use clip_sync::{BufferKind, PullOutcome, Session, SyncConfig, SyncContext, SyncEngine, SyncPoller};
//! use clip_sync::clock::ManualClock;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ctx = SyncContext::in_memory(Arc::new(ManualClock::new(0)));
//! let engine = Arc::new(SyncEngine::new(SyncConfig::default(), ctx));
//!
//! let laptop = SyncPoller::new(engine.clone(), Session::new("alice"));
//! let phone = SyncPoller::new(engine, Session::new("alice"));
//!
//! laptop.push(BufferKind::Text, b"hello").await.unwrap();
//! assert_eq!(laptop.poll_once().await.unwrap(), PullOutcome::NotModified);
//! assert!(matches!(phone.poll_once().await.unwrap(), PullOutcome::Fresh(_)));
//! # }
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::buffer::{BufferKind, BufferSnapshot};
use crate::coordinator::{PullOutcome, SyncEngine, SyncError};
use crate::session::Session;

pub struct SyncPoller {
    engine: Arc<SyncEngine>,
    session: Session,
    interval: Duration,
    /// `expires_at` of the newest buffer this device holds; 0 until it has one
    last_known: AtomicI64,
}

impl SyncPoller {
    /// Poll at the engine's configured `poll_interval`.
    pub fn new(engine: Arc<SyncEngine>, session: Session) -> Self {
        let interval = engine.config().poll_interval();
        Self::with_interval(engine, session, interval)
    }

    pub fn with_interval(engine: Arc<SyncEngine>, session: Session, interval: Duration) -> Self {
        Self {
            engine,
            session,
            interval,
            last_known: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn last_known(&self) -> i64 {
        self.last_known.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Push from this device. On success the device already holds the new
    /// buffer, so its next poll is `NotModified`.
    pub async fn push(&self, kind: BufferKind, payload: &[u8]) -> Result<i64, SyncError> {
        let expires_at = self.engine.push(&self.session, kind, payload).await?;
        self.last_known.store(expires_at, Ordering::Release);
        Ok(expires_at)
    }

    /// One conditional pull. A fresh buffer advances `last_known`.
    pub async fn poll_once(&self) -> Result<PullOutcome, SyncError> {
        let known = self.last_known();
        let outcome = self.engine.pull(&self.session, Some(known).filter(|&k| k != 0)).await?;

        if let PullOutcome::Fresh(snapshot) = &outcome {
            self.last_known.store(snapshot.expires_at, Ordering::Release);
        }
        Ok(outcome)
    }

    /// Poll until `shutdown` flips to true, its sender is dropped, the
    /// receiving end of `updates` goes away, or the engine stops serving.
    ///
    /// Every fresh buffer is sent to `updates`. Store errors are logged and
    /// retried on the next tick.
    pub async fn run(
        self: Arc<Self>,
        updates: mpsc::Sender<BufferSnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(user_id = %self.session.user_id, interval = ?self.interval, "Poller started");
        let mut delivered: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(PullOutcome::Fresh(snapshot)) => {
                            crate::metrics::record_poll("delivered");
                            debug!(expires_at = snapshot.expires_at, "New buffer for device");
                            if updates.send(snapshot).await.is_err() {
                                debug!("Update receiver dropped");
                                break;
                            }
                            delivered += 1;
                        }
                        Ok(_) => {
                            crate::metrics::record_poll("unchanged");
                        }
                        Err(SyncError::NotRunning) => {
                            info!("Engine no longer serving, poller exiting");
                            break;
                        }
                        Err(e) => {
                            crate::metrics::record_poll("error");
                            warn!(error = %e, "Poll failed, will retry next tick");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(user_id = %self.session.user_id, delivered, "Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SyncConfig;
    use crate::context::SyncContext;

    const TICK: Duration = Duration::from_secs(5);

    fn engine() -> (Arc<SyncEngine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = SyncContext::in_memory(clock.clone());
        (Arc::new(SyncEngine::new(SyncConfig::default(), ctx)), clock)
    }

    #[tokio::test]
    async fn test_own_push_is_not_downloaded_again() {
        let (engine, _clock) = engine();
        let laptop = SyncPoller::new(engine, Session::new("alice"));
        assert_eq!(laptop.last_known(), 0);

        let expires_at = laptop.push(BufferKind::Text, b"hello").await.unwrap();
        assert_eq!(laptop.last_known(), expires_at);
        assert_eq!(laptop.poll_once().await.unwrap(), PullOutcome::NotModified);
    }

    #[tokio::test]
    async fn test_fresh_pull_advances_last_known() {
        let (engine, clock) = engine();
        let laptop = SyncPoller::new(engine.clone(), Session::new("alice"));
        let phone = SyncPoller::new(engine, Session::new("alice"));

        let first = laptop.push(BufferKind::Text, b"one").await.unwrap();
        assert!(matches!(phone.poll_once().await.unwrap(), PullOutcome::Fresh(_)));
        assert_eq!(phone.last_known(), first);
        assert_eq!(phone.poll_once().await.unwrap(), PullOutcome::NotModified);

        clock.advance(Duration::from_millis(10));
        let second = laptop.push(BufferKind::Image, &[1, 2]).await.unwrap();
        match phone.poll_once().await.unwrap() {
            PullOutcome::Fresh(snapshot) => assert_eq!(snapshot.payload, vec![1, 2]),
            other => panic!("expected fresh buffer, got {:?}", other),
        }
        assert_eq!(phone.last_known(), second);
    }

    #[tokio::test]
    async fn test_empty_leaves_last_known_alone() {
        let (engine, clock) = engine();
        let phone = SyncPoller::new(engine.clone(), Session::new("alice"));
        let laptop = SyncPoller::new(engine, Session::new("alice"));

        let expires_at = laptop.push(BufferKind::Text, b"x").await.unwrap();
        phone.poll_once().await.unwrap();

        clock.advance(Duration::from_secs(301));
        assert_eq!(phone.poll_once().await.unwrap(), PullOutcome::Empty);
        assert_eq!(phone.last_known(), expires_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_delivers_other_devices_push_once_and_stops_on_signal() {
        let (engine, _clock) = engine();
        let laptop = SyncPoller::new(engine.clone(), Session::new("alice"));
        let phone = Arc::new(SyncPoller::with_interval(engine, Session::new("alice"), TICK));

        let (tx, mut rx) = mpsc::channel(8);
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(phone.clone().run(tx, stop_rx));

        let expires_at = laptop.push(BufferKind::Text, b"hello").await.unwrap();

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.payload, b"hello".to_vec());
        assert_eq!(phone.last_known(), expires_at);

        // Later ticks see nothing new
        tokio::time::sleep(TICK * 4).await;
        assert!(rx.try_recv().is_err());

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_when_engine_stops() {
        let (engine, _clock) = engine();
        let phone = Arc::new(SyncPoller::with_interval(engine.clone(), Session::new("alice"), TICK));

        let (tx, _rx) = mpsc::channel(1);
        let (_stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(phone.run(tx, stop_rx));

        engine.shutdown().await;
        tokio::time::timeout(TICK * 2, handle).await.unwrap().unwrap();
    }
}
