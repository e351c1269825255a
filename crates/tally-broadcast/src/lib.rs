//! Periodic broadcast of the live tally.
//!
//! On a fixed interval the [`Broadcaster`] takes one snapshot from the
//! [`TallyStore`], serializes it once, and publishes it to every configured
//! [`PublishSink`] under a channel and event name.
//!
//! # Sinks
//!
//! - [`PusherSink`] -- Pusher Channels REST API (`POST /apps/{id}/events`),
//!   the original subscriber transport for the chart front-end.
//! - [`LocalSink`] -- an in-process [`tokio::sync::broadcast`] channel that
//!   feeds the query server's `WebSocket` endpoint.
//!
//! [`PublishTarget`] wraps both so a single broadcaster can drive them.
//!
//! # Failure policy
//!
//! Each publish gets one retry after a short backoff. A second failure is
//! logged and the tick is skipped for that sink; the timer keeps running.
//!
//! [`TallyStore`]: tally_core::TallyStore

pub mod broadcaster;
pub mod error;
pub mod pusher;
pub mod sink;

pub use broadcaster::{BroadcastConfig, BroadcastReport, Broadcaster};
pub use error::PublishError;
pub use pusher::{PusherCredentials, PusherSink};
pub use sink::{LocalSink, Publication, PublishSink, PublishTarget};
