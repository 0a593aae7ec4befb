// src/server/viewer_server.rs

//! Public-facing HTTP server hosting the live-log viewer websocket
//! endpoint (§4.6, §6 "Live-log viewer interface").

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::connection::viewer;
use crate::core::state::ServerState;
use crate::core::storage::DiskLogStore;

#[derive(Clone)]
struct ViewerAppState {
    server: Arc<ServerState>,
    store: Arc<DiskLogStore>,
}

async fn logs_handler(
    State(state): State<ViewerAppState>,
    Path((run_id, tc_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| viewer::run(socket, state.server, state.store, run_id, tc_id))
}

/// Runs the viewer websocket server until shutdown.
pub async fn run(server_state: Arc<ServerState>, store: Arc<DiskLogStore>, port: u16, mut shutdown_rx: broadcast::Receiver<()>) {
    let state = ViewerAppState { server: server_state, store };
    let app = Router::new()
        .route("/logs/{run_id}/{tc_id}", get(logs_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Live-log viewer server listening on ws://{}/logs/:run_id/:tc_id", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind viewer server on port {}: {}", port, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Viewer server shutting down.");
        })
        .await
        .unwrap();
}
