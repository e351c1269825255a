//! Lifecycle states of the stream consumer.

use std::fmt;

use serde::Serialize;

/// Where the consumer is in its connection lifecycle.
///
/// ```text
/// Disconnected --> Connecting --> Streaming --> Stopped
///                      ^              |
///                      +--------------+  (transient disconnect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Not yet connected.
    #[default]
    Disconnected,
    /// Opening (or re-opening) the stream.
    Connecting,
    /// Receiving events.
    Streaming,
    /// Terminal: shut down or gave up.
    Stopped,
}

impl StreamState {
    /// Lowercase name used in logs and the health endpoint.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
