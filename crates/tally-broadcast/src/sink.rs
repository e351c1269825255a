//! Publish sink abstraction and the in-process fan-out sink.

use std::future::Future;

use tokio::sync::broadcast;
use tracing::trace;

use crate::error::PublishError;
use crate::pusher::PusherSink;

/// Capacity of the local fan-out channel.
///
/// A subscriber that falls behind by more than this many updates skips to
/// the newest one.
pub const LOCAL_CHANNEL_CAPACITY: usize = 64;

/// One broadcast message: a serialized snapshot addressed to a channel and
/// event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Channel (topic) name.
    pub channel: String,
    /// Event name within the channel.
    pub event: String,
    /// JSON payload, identical in shape to the snapshot query response.
    pub payload: String,
    /// Tick number that produced this publication, starting at 1.
    pub sequence: u64,
}

/// A destination for tally broadcasts.
pub trait PublishSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Deliver one publication.
    fn publish(
        &self,
        publication: &Publication,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// In-process fan-out over a [`broadcast`] channel.
///
/// Receivers get the raw JSON payload. Publishing with no receivers
/// connected succeeds.
#[derive(Debug, Clone)]
pub struct LocalSink {
    tx: broadcast::Sender<String>,
}

impl LocalSink {
    /// Create a sink with its own channel.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future payloads.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// The underlying sender, for handing to other components.
    pub fn sender(&self) -> broadcast::Sender<String> {
        self.tx.clone()
    }
}

impl Default for LocalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishSink for LocalSink {
    fn name(&self) -> &str {
        "local"
    }

    async fn publish(&self, publication: &Publication) -> Result<(), PublishError> {
        // send only fails when nobody is listening, which is normal
        let receivers = self.tx.send(publication.payload.clone()).unwrap_or(0);
        trace!(receivers, sequence = publication.sequence, "local fan-out");
        Ok(())
    }
}

/// Every concrete sink the service can broadcast to.
///
/// Enum dispatch keeps [`Broadcaster`](crate::Broadcaster) generic over a
/// single sink type while driving several transports.
#[derive(Debug)]
pub enum PublishTarget {
    /// Pusher Channels REST API.
    Pusher(PusherSink),
    /// In-process `WebSocket` fan-out.
    Local(LocalSink),
}

impl PublishSink for PublishTarget {
    fn name(&self) -> &str {
        match self {
            Self::Pusher(sink) => sink.name(),
            Self::Local(sink) => sink.name(),
        }
    }

    async fn publish(&self, publication: &Publication) -> Result<(), PublishError> {
        match self {
            Self::Pusher(sink) => sink.publish(publication).await,
            Self::Local(sink) => sink.publish(publication).await,
        }
    }
}
