// src/connection/handler.rs

//! Manages the full lifecycle of one runner connection: frames in, session
//! dispatch, watchdog, frames out (§4.5).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::guard::ConnectionGuard;
use crate::core::errors::IngestError;
use crate::core::ingest::IngestSession;
use crate::core::protocol::{decode_frame, FrameCodec};
use crate::core::state::ServerState;
use crate::core::storage::DiskLogStore;
use crate::core::tasks::{WATCHDOG_IDLE_TIMEOUT_SECS, WATCHDOG_TICK_SECS};

/// Manages one runner connection from accept to disconnect.
pub struct IngestConnectionHandler {
    framed: Framed<TcpStream, FrameCodec>,
    addr: SocketAddr,
    session: IngestSession,
}

impl IngestConnectionHandler {
    pub fn new(socket: TcpStream, addr: SocketAddr, state: Arc<ServerState>, store: Arc<DiskLogStore>) -> Self {
        Self {
            framed: Framed::new(socket, FrameCodec),
            addr,
            session: IngestSession::new(state, store),
        }
    }

    /// Runs the connection to completion: decode, dispatch, watchdog, and
    /// clean-up on disconnect (§4.5).
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), IngestError> {
        let _guard = ConnectionGuard::new();
        let mut watchdog = tokio::time::interval(Duration::from_secs(WATCHDOG_TICK_SECS));

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!(addr = %self.addr, "connection handler received shutdown signal");
                    break;
                }
                _ = watchdog.tick() => {
                    if self.session.last_activity.elapsed() > Duration::from_secs(WATCHDOG_IDLE_TIMEOUT_SECS) {
                        warn!(addr = %self.addr, run_id = ?self.session.run_id(), "idle watchdog timeout");
                        self.session.abort("Connection timeout").await;
                        break;
                    }
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(value)) => {
                            match decode_frame(&value) {
                                Ok(frame) => {
                                    if let Some(reply) = self.session.apply(frame).await
                                        && let Err(e) = self.framed.send(reply).await
                                    {
                                        warn!(addr = %self.addr, error = %e, "failed to send reply");
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(addr = %self.addr, error = %e, "dropping malformed frame");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(addr = %self.addr, error = %e, "connection error");
                            break;
                        }
                        None => {
                            debug!(addr = %self.addr, "connection closed by peer");
                            break;
                        }
                    }
                }
            }
        }

        self.session.on_clean_close().await;
        Ok(())
    }
}
