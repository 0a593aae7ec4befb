// src/server/initialization.rs

//! Handles the complete server initialization process: config is already
//! loaded by the caller, so this opens the relational index, prepares the
//! disk log store's data directory, runs the startup abandoned-run sweep,
//! and binds the ingest listener.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

use super::context::ServerContext;
use crate::config::Config;
use crate::core::index::Index;
use crate::core::state::ServerState;
use crate::core::storage::DiskLogStore;
use crate::core::tasks;

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    tokio::fs::create_dir_all(&config.data_dir).await?;
    if let Some(parent) = std::path::Path::new(&config.index_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let index = Index::open(&config.index_path)?;
    let data_dir = config.data_dir.clone();
    let host = config.host.clone();
    let port = config.port;

    let state = Arc::new(ServerState::new(config, index, log_reload_handle));
    let store = Arc::new(DiskLogStore::new(data_dir));

    tasks::run_startup_sweep(&state).await?;

    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!("runtrace ingest listener bound on {}:{}", host, port);

    Ok(ServerContext {
        state,
        store,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    info!(
        data_dir = %config.data_dir,
        index_path = %config.index_path,
        "runtrace starting up"
    );
    match config.default_retention_days {
        Some(days) => info!("Default retention window: {} days.", days),
        None => info!("No default retention window configured; runs are kept until explicitly deleted."),
    }
}
