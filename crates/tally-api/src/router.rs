//! Axum router construction.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete router.
///
/// - `GET /` -- minimal HTML status page
/// - `GET /polls` -- snapshot of every option
/// - `GET /polls/{option}` -- count for one option
/// - `GET /healthz` -- liveness and stream state
/// - `GET /ws/tally` -- `WebSocket` stream of broadcast payloads
///
/// CORS allows any origin so a browser chart can poll from elsewhere.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/polls", get(handlers::get_polls))
        .route("/polls/{option}", get(handlers::get_poll))
        .route("/healthz", get(handlers::healthz))
        .route("/ws/tally", get(ws::ws_tally))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
