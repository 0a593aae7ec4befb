// src/connection/viewer.rs

//! The live-log viewer connection (§4.6): replay-then-subscribe over a
//! websocket at `/logs/{run_id}/{tc_id}`. Each binary websocket message
//! carries one MessagePack-encoded value, the same representation the
//! frame codec uses on the wire minus the length prefix (the websocket
//! layer already delineates messages).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use rmpv::Value;
use tracing::{debug, warn};

use crate::core::ingest::{validate_run_id, validate_tc_id};
use crate::core::metrics;
use crate::core::protocol::{entry, outbound};
use crate::core::state::{Run, ServerState};
use crate::core::storage::DiskLogStore;

async fn unsubscribe(run_lock: &Arc<tokio::sync::RwLock<Run>>, tc_id: &str, sub_id: u64) {
    let mut run = run_lock.write().await;
    if let Some(tc) = run.test_case_by_id_mut(tc_id) {
        tc.unsubscribe(sub_id);
    }
}

async fn send_value(socket: &mut WebSocket, value: &Value) -> bool {
    let mut payload = Vec::new();
    if rmpv::encode::write_value(&mut payload, value).is_err() {
        return false;
    }
    socket.send(Message::Binary(payload.into())).await.is_ok()
}

async fn close_with_error(socket: &mut WebSocket, message: &str) {
    let _ = send_value(socket, &outbound::viewer_error(message)).await;
}

/// Serves one viewer connection to completion (§4.6).
pub async fn run(
    mut socket: WebSocket,
    state: Arc<ServerState>,
    store: Arc<DiskLogStore>,
    run_id: String,
    tc_id: String,
) {
    if validate_run_id(&run_id).is_err() || validate_tc_id(&tc_id).is_err() {
        close_with_error(&mut socket, "Test run not found").await;
        return;
    }

    let Some(run_lock) = state.runs.get(&run_id).await else {
        close_with_error(&mut socket, "Test run not found").await;
        return;
    };

    let subscription = {
        let mut run = run_lock.write().await;
        let Some(tc) = run.test_case_by_id_mut(&tc_id) else {
            drop(run);
            close_with_error(&mut socket, "Test run not found").await;
            return;
        };
        let (sub_id, rx) = tc.subscribe();
        let strings = run.string_table.snapshot();
        (sub_id, rx, strings)
    };
    let (sub_id, mut rx, strings) = subscription;
    metrics::ACTIVE_SUBSCRIBERS.inc();

    if !send_value(&mut socket, &outbound::string_table_frame(&strings)).await {
        unsubscribe(&run_lock, &tc_id, sub_id).await;
        metrics::ACTIVE_SUBSCRIBERS.dec();
        return;
    }

    let mut replay: Vec<Value> = match store.read_case_log(&run_id, &tc_id).await {
        Ok(logs) => logs,
        Err(e) => {
            warn!(run_id, tc_id, error = %e, "failed to read case log for viewer replay");
            Vec::new()
        }
    };
    match store.read_case_stack(&run_id, &tc_id).await {
        Ok(stacks) => replay.extend(stacks.iter().map(entry::exception_viewer_payload)),
        Err(e) => warn!(run_id, tc_id, error = %e, "failed to read case stack for viewer replay"),
    }
    replay.sort_by_key(entry::record_ts);

    for item in &replay {
        if !send_value(&mut socket, item).await {
            unsubscribe(&run_lock, &tc_id, sub_id).await;
            metrics::ACTIVE_SUBSCRIBERS.dec();
            return;
        }
    }

    loop {
        tokio::select! {
            item = rx.recv() => {
                match item {
                    Some(value) => {
                        if !send_value(&mut socket, &value).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {} // viewers don't send meaningful messages
                }
            }
        }
    }

    debug!(run_id, tc_id, "viewer connection closed");
    unsubscribe(&run_lock, &tc_id, sub_id).await;
    metrics::ACTIVE_SUBSCRIBERS.dec();
}
