//! `WebSocket` relay for broadcast ticks.
//!
//! Clients connect to `GET /ws/tally`, immediately receive the current
//! snapshot, then one text frame per broadcast tick. A client that falls
//! behind skips to the newest payload. Sessions close on process shutdown.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade the request and start relaying tally payloads.
///
/// # Route
///
/// `GET /ws/tally`
pub async fn ws_tally(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");

    let mut rx = state.subscribe();

    match state.responder.snapshot_json() {
        Ok(initial) => {
            if socket.send(Message::Text(initial.into())).await.is_err() {
                debug!("WebSocket client disconnected (initial send failed)");
                return;
            }
        }
        Err(e) => warn!("failed to serialize initial snapshot: {e}"),
    }

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                debug!("shutting down, closing WebSocket");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            result = rx.recv() => {
                match result {
                    Ok(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            debug!("WebSocket client disconnected (send failed)");
                            return;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "WebSocket client lagged, skipping ahead");
                    }
                    Err(RecvError::Closed) => {
                        debug!("broadcast channel closed, closing WebSocket");
                        let _ = socket.send(Message::Close(None)).await;
                        return;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    // client text and binary frames are ignored
                    _ => {}
                }
            }
        }
    }
}
