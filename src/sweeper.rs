// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background expiry sweeper.
//!
//! Reclaims space only. Readers enforce expiry on their own, so a slow or
//! failing sweep never changes what a pull returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::resilience::deadline::with_deadline;
use crate::storage::traits::BufferStore;

pub struct ExpirySweeper {
    store: Arc<dyn BufferStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    timeout: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn BufferStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            interval,
            timeout,
        }
    }

    /// Tick until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Expiry sweeper started");
        let mut total: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(removed) = self.tick().await {
                        total += removed;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(total_removed = total, "Expiry sweeper stopped");
    }

    /// One sweep. Failures are logged and counted; `None` means this tick
    /// removed nothing because the store call failed.
    pub async fn tick(&self) -> Option<u64> {
        let now = self.clock.now_millis();
        let _timer = crate::time_operation!("store", "sweep");

        match with_deadline("store", "sweep", self.timeout, self.store.sweep(now)).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "Swept expired buffers");
                } else {
                    debug!("Sweep found nothing to remove");
                }
                crate::metrics::record_swept(removed);
                Some(removed)
            }
            Err(e) => {
                warn!(error = %e, "Sweep failed, will retry next tick");
                crate::metrics::record_sweep_failure();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, BufferKind};
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryBufferStore;
    use crate::storage::traits::StorageError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenStore {
        sweeps: AtomicUsize,
    }

    #[async_trait]
    impl BufferStore for BrokenStore {
        async fn upsert(&self, _: &str, _: BufferKind, _: &[u8], _: i64, _: Duration) -> Result<i64, StorageError> {
            Err(StorageError::Backend("down".into()))
        }
        async fn fetch_latest(&self, _: &str, _: i64) -> Result<Buffer, StorageError> {
            Err(StorageError::Backend("down".into()))
        }
        async fn sweep(&self, _: i64) -> Result<u64, StorageError> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Backend("down".into()))
        }
        async fn count_for_user(&self, _: &str) -> Result<u64, StorageError> {
            Ok(0)
        }
        async fn count_all(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_tick_removes_only_expired() {
        let store = Arc::new(MemoryBufferStore::new());
        let clock = Arc::new(ManualClock::new(0));
        store.upsert("old", BufferKind::Text, b"a", 0, Duration::from_secs(1)).await.unwrap();
        store.upsert("new", BufferKind::Text, b"b", 0, Duration::from_secs(60)).await.unwrap();

        let sweeper = ExpirySweeper::new(store.clone(), clock.clone(), Duration::from_secs(60), Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));

        assert_eq!(sweeper.tick().await, Some(1));
        assert_eq!(sweeper.tick().await, Some(0));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_tick_is_swallowed() {
        let store = Arc::new(BrokenStore { sweeps: AtomicUsize::new(0) });
        let sweeper = ExpirySweeper::new(store.clone(), Arc::new(ManualClock::new(0)), Duration::from_secs(60), Duration::from_secs(1));

        assert_eq!(sweeper.tick().await, None);
        assert_eq!(sweeper.tick().await, None);
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_ticking_after_failures_and_stops_on_signal() {
        let store = Arc::new(BrokenStore { sweeps: AtomicUsize::new(0) });
        let sweeper = ExpirySweeper::new(store.clone(), Arc::new(ManualClock::new(0)), Duration::from_secs(60), Duration::from_secs(1));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(sweeper.run(rx));

        // First tick fires immediately, then one per interval
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_sender_dropped() {
        let store = Arc::new(MemoryBufferStore::new());
        let sweeper = ExpirySweeper::new(store, Arc::new(ManualClock::new(0)), Duration::from_secs(60), Duration::from_secs(1));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(sweeper.run(rx));
        drop(tx);

        handle.await.unwrap();
    }
}
