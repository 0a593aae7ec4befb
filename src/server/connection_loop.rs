// src/server/connection_loop.rs

//! The main loop that accepts runner ingest connections and drives graceful
//! shutdown (§5 "Startup/shutdown behavior").

use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::context::ServerContext;
use crate::connection::IngestConnectionHandler;
use crate::core::metrics;

#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Waits for a shutdown signal based on the operating system.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("Failed to create Ctrl+C stream");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// The main server loop: accepts runner connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => {
                break;
            },

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("A background task has completed."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                if let Ok((socket, addr)) = res {
                    info!("Accepted new ingest connection from: {}", addr);
                    metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                    let state_clone = ctx.state.clone();
                    let store_clone = ctx.store.clone();
                    let conn_shutdown_rx = ctx.shutdown_tx.subscribe();

                    client_tasks.spawn(async move {
                        let mut handler = IngestConnectionHandler::new(socket, addr, state_clone, store_clone);
                        if let Err(e) = handler.run(conn_shutdown_rx).await {
                            warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                        }
                    });
                } else if let Err(e) = res {
                    error!("Failed to accept connection: {}", e);
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("An ingest connection handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("Failed to send shutdown signal; no tasks were listening.");
    }

    client_tasks.shutdown().await;
    info!("All ingest connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }
    info!("Server shutdown complete.");
}
