// src/core/tasks/mod.rs

//! Background tasks run alongside the accept loop: the startup
//! abandoned-run sweep and the periodic retention sweep (§5
//! "Startup/shutdown behavior", "Retention").

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::core::errors::IngestError;
use crate::core::metrics;
use crate::core::retention;
use crate::core::state::ServerState;
use crate::core::storage::DiskLogStore;

/// Sweeps the index for runs left `running`/`aborted` by a prior process
/// lifetime, marking their still-running cases aborted (§5). Runs once,
/// before the accept loop starts.
pub async fn run_startup_sweep(state: &ServerState) -> Result<(), IngestError> {
    let swept = state.index.sweep_abandoned_runs().await?;
    for run_id in &swept {
        metrics::RUNS_ABANDONED_TOTAL.inc();
        info!(run_id, "swept abandoned run from prior process lifetime");
    }
    if !swept.is_empty() {
        info!(count = swept.len(), "startup sweep complete");
    }
    Ok(())
}

/// Periodically deletes on-disk artifacts for runs past their retention
/// window. The sweep cadence itself is a collaborator concern (§5
/// "Retention decoupling"); `tick_secs` here stands in for that external
/// schedule in the absence of a real timer service.
pub struct RetentionSweeper {
    state: Arc<ServerState>,
    store: DiskLogStore,
    tick_secs: u64,
}

impl RetentionSweeper {
    pub fn new(state: Arc<ServerState>, store: DiskLogStore, tick_secs: u64) -> Self {
        Self { state, store, tick_secs }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.tick_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = crate::core::state::now_ms();
                    match retention::sweep(&self.state.index, &self.store, now).await {
                        Ok(n) if n > 0 => info!(deleted = n, "retention sweep deleted runs past their window"),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("retention sweeper shutting down");
                    return;
                }
            }
        }
    }
}

/// A 5-second tick per ingest session that enforces the idle timeout and
/// liveness checks (§4.5 "Watchdog"). Lives alongside the ingest session
/// rather than as a server-wide task since it needs exclusive access to
/// one run.
pub const WATCHDOG_TICK_SECS: u64 = 5;
pub const WATCHDOG_IDLE_TIMEOUT_SECS: u64 = 30;
