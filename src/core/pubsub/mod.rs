// src/core/pubsub/mod.rs

//! The UI broadcast channel (§4.6, §6 "UI broadcast interface"): a single
//! fan-out stream of `run_started` / `test_case_started` /
//! `test_case_updated` / `test_case_finished` / `run_finished` events that
//! every connected dashboard session subscribes to.
//!
//! Per-test-case live-log subscriptions (the "live-log viewer interface")
//! are a different shape — replay-then-follow against one test case's
//! entries — and live on `state::TestCase` instead, since they need
//! access to the entries already buffered for that case.

use rmpv::Value;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::debug;

use super::protocol::outbound::UiEvent;

/// Capacity of the UI broadcast channel. A slow viewer that falls behind
/// by this many events starts missing messages (`RecvError::Lagged`); the
/// viewer handler resyncs it by resubscribing.
const UI_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct UiBroadcast {
    sender: Sender<Value>,
}

impl Default for UiBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl UiBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(UI_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribes a newly connected dashboard session to the UI broadcast stream.
    pub fn subscribe(&self) -> Receiver<Value> {
        self.sender.subscribe()
    }

    /// Broadcasts a UI event to every currently subscribed dashboard session.
    /// Returns the number of sessions the event was delivered to.
    pub fn publish(&self, event: &UiEvent) -> usize {
        match self.sender.send(event.to_value()) {
            Ok(n) => n,
            Err(_) => {
                debug!("UI broadcast published with no active subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
