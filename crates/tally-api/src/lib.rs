//! Query surface for the live tally.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **Snapshot queries** (`GET /polls`, `GET /polls/{option}`) answered by
//!   the [`SnapshotResponder`], a read-only view over the shared
//!   [`TallyStore`](tally_core::TallyStore)
//! - **Health** (`GET /healthz`) reporting the stream consumer's state
//! - **`WebSocket` endpoint** (`/ws/tally`) relaying every broadcast tick
//!   from an in-process [`tokio::sync::broadcast`] channel
//! - **Minimal HTML page** (`GET /`) listing options and counts
//!
//! Every read takes a fresh snapshot; nothing is cached here. Queries only
//! contend with each other through the store's shared lock.

pub mod error;
pub mod handlers;
pub mod responder;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use error::QueryError;
pub use responder::SnapshotResponder;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, bind, serve};
pub use state::AppState;
