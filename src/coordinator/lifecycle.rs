//! Engine lifecycle management: start, shutdown, on-demand sweep.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::sweeper::ExpirySweeper;

use super::{EngineState, SweeperTask, SyncEngine, SyncError};

impl SyncEngine {
    fn build_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.ctx.store.clone(),
            self.ctx.clock.clone(),
            self.config.sweep_interval(),
            self.config.operation_timeout(),
        )
    }

    /// Spawn the expiry sweeper and move to `Running`.
    ///
    /// Starting a running engine is a no-op. A stopped engine cannot be
    /// restarted.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SyncError> {
        let mut sweeper = self.sweeper.lock();

        match self.state() {
            EngineState::Running => {
                debug!("Engine already running");
                return Ok(());
            }
            EngineState::ShuttingDown | EngineState::Stopped => {
                warn!("Refusing to start a stopped engine");
                return Err(SyncError::NotRunning);
            }
            EngineState::Created => {}
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.build_sweeper().run(shutdown_rx));
        *sweeper = Some(SweeperTask { shutdown, handle });

        self.set_state(EngineState::Running);
        info!(
            lifetime = ?self.config.buffer_lifetime(),
            sweep_interval = ?self.config.sweep_interval(),
            "Sync engine running"
        );
        Ok(())
    }

    /// Stop the sweeper, wait for it, and move to `Stopped`.
    ///
    /// Push and pull are refused from the moment this is called.
    pub async fn shutdown(&self) {
        let shutdown_start = std::time::Instant::now();

        // `start` checks state under the same lock
        let task = {
            let mut sweeper = self.sweeper.lock();
            if matches!(self.state(), EngineState::ShuttingDown | EngineState::Stopped) {
                return;
            }
            info!("Initiating sync engine shutdown...");
            self.set_state(EngineState::ShuttingDown);
            sweeper.take()
        };

        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Sweeper task ended abnormally");
            }
        }

        self.set_state(EngineState::Stopped);
        info!(elapsed = ?shutdown_start.elapsed(), "Sync engine shutdown complete");
    }

    /// Run one sweep now, the same way the background sweeper does.
    ///
    /// Returns the number of rows removed, or `None` if the sweep failed.
    pub async fn sweep_tick(&self) -> Option<u64> {
        self.build_sweeper().tick().await
    }
}
