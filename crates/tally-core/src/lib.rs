//! Concurrent keyword tally store.
//!
//! This crate owns the single piece of shared mutable state in the service:
//! the live count of how many inbound text events mentioned each tracked
//! option. Every other component (stream consumer, broadcaster, snapshot
//! responder) reaches the counts only through [`TallyStore`].
//!
//! # Modules
//!
//! - [`options`] -- [`TrackedOptions`]: the validated, fixed set of 2 or 3
//!   keyword options.
//! - [`store`] -- [`TallyStore`]: counts behind a reader-writer lock.
//! - [`snapshot`] -- [`TallySnapshot`]: an immutable point-in-time copy that
//!   serializes to the public JSON shape.
//!
//! # Usage
//!
//! ```
//! use tally_core::TallyStore;
//!
//! let store = TallyStore::init(["Messi", " Suarez "]).ok();
//! let store = store.as_ref();
//!
//! if let Some(store) = store {
//!     store.increment("Messi");
//!     store.increment("Suarez");
//!     store.increment("Messi");
//!     store.increment("Ronaldo"); // untracked: ignored
//!
//!     assert_eq!(store.count("Messi"), 2);
//!     assert_eq!(store.snapshot().total(), 3);
//! }
//! ```

pub mod options;
pub mod snapshot;
pub mod store;

pub use options::{MAX_OPTIONS, MIN_OPTIONS, TrackedOptions};
pub use snapshot::{OptionCount, TallySnapshot};
pub use store::TallyStore;

/// Errors raised while validating the tracked option set.
///
/// Every variant is fatal at startup: the process reports it and never
/// begins serving.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Fewer than [`MIN_OPTIONS`] options were supplied.
    #[error("there must be at least {MIN_OPTIONS} options, got {count}")]
    TooFewOptions {
        /// Number of options supplied.
        count: usize,
    },

    /// More than [`MAX_OPTIONS`] options were supplied.
    #[error("there cannot be more than {MAX_OPTIONS} options, got {count}")]
    TooManyOptions {
        /// Number of options supplied.
        count: usize,
    },

    /// An option was empty once surrounding whitespace was removed.
    #[error("option at position {position} is empty after trimming")]
    EmptyOption {
        /// Zero-based position in the supplied list.
        position: usize,
    },

    /// The same option appeared more than once after trimming.
    #[error("duplicate option: {option}")]
    DuplicateOption {
        /// The repeated (trimmed) option.
        option: String,
    },
}
