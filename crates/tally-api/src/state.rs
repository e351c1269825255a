//! Shared application state for the query server.

use tally_stream::StreamState;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::responder::SnapshotResponder;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`](std::sync::Arc) and injected via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    /// Read-only view of the tally.
    pub responder: SnapshotResponder,
    /// Sender side of the broadcast fan-out; `WebSocket` clients subscribe
    /// to it.
    pub updates: broadcast::Sender<String>,
    /// Current stream consumer state.
    pub stream_state: watch::Receiver<StreamState>,
    /// Fires on process shutdown; long-lived `WebSocket` sessions end on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Bundle the pieces the handlers need.
    pub fn new(
        responder: SnapshotResponder,
        updates: broadcast::Sender<String>,
        stream_state: watch::Receiver<StreamState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            responder,
            updates,
            stream_state,
            shutdown,
        }
    }

    /// Subscribe to broadcast payloads.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }

    /// Latest stream consumer state.
    pub fn stream_state(&self) -> StreamState {
        *self.stream_state.borrow()
    }
}
