//! Error types for the tally server binary.
//!
//! Everything here is fatal at startup. Runtime failures inside the
//! long-running tasks are logged by those tasks and never reach `main`.

use tally_core::ConfigurationError;
use tally_stream::StreamError;

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The tracked option list is invalid.
    #[error("invalid tracked options: {0}")]
    Options(#[from] ConfigurationError),

    /// A required environment variable is unset or empty.
    #[error("missing required env var {name}")]
    MissingEnv {
        /// Variable name.
        name: &'static str,
    },

    /// A setting has an unusable value.
    #[error("invalid {name}: {message}")]
    Invalid {
        /// Setting name.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// An explicitly requested env file could not be loaded.
    #[error("failed to load env file {path}: {message}")]
    EnvFile {
        /// Path that was requested.
        path: String,
        /// Loader error.
        message: String,
    },
}

/// Top-level error returned by the server's run function.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The query server could not bind its listener.
    #[error(transparent)]
    Http(#[from] tally_api::ServerError),

    /// The filtered stream could not be opened at startup.
    #[error("stream establishment failed: {0}")]
    StreamEstablishment(#[source] StreamError),

    /// A publish sink could not be constructed.
    #[error("publish sink setup failed: {0}")]
    Publish(#[from] tally_broadcast::PublishError),
}
