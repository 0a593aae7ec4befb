// src/server/spawner.rs

//! Spawns the server's long-running background tasks: the retention
//! sweeper, the optional Prometheus metrics server, and the live-log
//! viewer websocket server.

use anyhow::Result;
use tracing::info;

use super::context::ServerContext;
use super::{metrics_server, viewer_server};
use crate::core::tasks::RetentionSweeper;

/// Default cadence for the retention sweep; the config has no dedicated
/// knob for this yet since it stands in for an external scheduler (§5
/// "Retention decoupling").
const RETENTION_SWEEP_TICK_SECS: u64 = 300;

/// Spawns all background tasks into the provided JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = ctx.state.clone();
    let store = ctx.store.clone();
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Retention sweeper ---
    let sweeper = RetentionSweeper::new(state.clone(), (*store).clone(), RETENTION_SWEEP_TICK_SECS);
    let shutdown_rx_retention = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sweeper.run(shutdown_rx_retention).await;
        Ok(())
    });

    // --- Metrics server ---
    if state.config.metrics.enabled {
        let metrics_state = state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Live-log viewer server ---
    let viewer_state = state.clone();
    let viewer_store = store.clone();
    let viewer_port = state.config.viewer_port;
    let shutdown_rx_viewer = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        viewer_server::run(viewer_state, viewer_store, viewer_port, shutdown_rx_viewer).await;
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
