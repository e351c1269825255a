//! Error types for stream intake.
//!
//! [`StreamError::is_transient`] drives the consumer's reconnect decision:
//! transient errors send it back to `Connecting`, everything else stops it.

/// Errors raised while connecting to or reading from the event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The connection attempt failed at the transport level, or the
    /// upstream asked us to back off (rate limit, server error).
    #[error("stream connect failed: {0}")]
    Connect(String),

    /// The upstream refused the stream outright (bad credentials,
    /// malformed filter). Retrying will not help.
    #[error("stream rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// An established stream dropped mid-flight.
    #[error("stream disconnected: {0}")]
    Disconnected(String),

    /// No bytes (not even keep-alives) arrived within the stall timeout.
    #[error("stream stalled: no data for {timeout_secs}s")]
    Stalled {
        /// The stall timeout that elapsed, in seconds.
        timeout_secs: u64,
    },

    /// A read was attempted with no open stream.
    #[error("stream is not connected")]
    NotConnected,

    /// The request could not be signed.
    #[error("request signing failed: {0}")]
    Signing(String),

    /// Every reconnect attempt in the retry budget failed.
    #[error("reconnect budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },
}

impl StreamError {
    /// Whether the consumer should try to reconnect after this error.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Disconnected(_) | Self::Stalled { .. } | Self::NotConnected
        )
    }
}
