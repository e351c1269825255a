//! Error types for broadcast delivery.

/// Errors that can occur while publishing a tally update.
///
/// None of these are fatal; the broadcaster logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The request never got a response (DNS, connect, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The publish endpoint answered with a non-success status.
    #[error("publish rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The message body could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request could not be signed.
    #[error("request signing failed: {0}")]
    Signing(String),
}
