//! The event source abstraction read by [`StreamConsumer`].
//!
//! [`StreamConsumer`]: crate::StreamConsumer

use std::future::Future;

use crate::error::StreamError;

/// A connection-oriented source of short text events.
///
/// The consumer drives the lifecycle: [`connect`](Self::connect) once at
/// startup and again after each transient failure, then
/// [`next_text`](Self::next_text) until it errors or returns `Ok(None)`.
pub trait EventSource: Send {
    /// Open (or re-open) the stream.
    ///
    /// Errors for which [`StreamError::is_transient`] is true are retried
    /// by the consumer; anything else stops it.
    fn connect(&mut self) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Wait for the next text event.
    ///
    /// Returns `Ok(None)` when the upstream closed the stream cleanly.
    fn next_text(&mut self) -> impl Future<Output = Result<Option<String>, StreamError>> + Send;

    /// Drop the current connection, if any.
    fn close(&mut self);
}
