//! Stream consumer for the keyword tally service.
//!
//! Bridges an external filtered text stream into [`TallyStore`] mutations.
//! Each inbound text is tested (case-sensitive substring match) against
//! every tracked option and each contained option is incremented, so one
//! text may count toward several options.
//!
//! # Architecture
//!
//! ```text
//! EventSource (HTTP stream) --> StreamConsumer --> TallyStore::increment
//!                                     |
//!                                     +--> watch<StreamState> (health)
//! ```
//!
//! - [`source`] -- the [`EventSource`] abstraction the consumer reads from.
//! - [`consumer`] -- [`StreamConsumer`]: the state machine, reconnect with
//!   backoff, and shutdown handling.
//! - [`twitter`] -- [`FilteredStream`]: the concrete HTTP streaming source.
//! - [`oauth`] -- OAuth 1.0a request signing used by [`FilteredStream`].
//!
//! [`TallyStore`]: tally_core::TallyStore

pub mod consumer;
pub mod error;
pub mod oauth;
pub mod policy;
pub mod source;
pub mod state;
pub mod twitter;

pub use consumer::{ConsumerReport, StreamConsumer, mentions};
pub use error::StreamError;
pub use oauth::OAuthCredentials;
pub use policy::ReconnectPolicy;
pub use source::EventSource;
pub use state::StreamState;
pub use twitter::FilteredStream;
