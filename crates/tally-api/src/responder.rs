//! Read-only query path over the tally store.

use std::sync::Arc;

use tally_core::{OptionCount, TallySnapshot, TallyStore, TrackedOptions};

use crate::error::QueryError;

/// Answers snapshot queries. Holds no state of its own and never mutates
/// the store.
#[derive(Debug, Clone)]
pub struct SnapshotResponder {
    store: Arc<TallyStore>,
}

impl SnapshotResponder {
    /// Create a responder over a shared store.
    pub const fn new(store: Arc<TallyStore>) -> Self {
        Self { store }
    }

    /// The tracked options, in configuration order.
    pub fn options(&self) -> &TrackedOptions {
        self.store.options()
    }

    /// A fresh snapshot.
    pub fn snapshot(&self) -> TallySnapshot {
        self.store.snapshot()
    }

    /// A fresh snapshot serialized as `{"<option>": count, ...}`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Serialization`] if encoding fails.
    pub fn snapshot_json(&self) -> Result<String, QueryError> {
        Ok(serde_json::to_string(&self.store.snapshot())?)
    }

    /// Count for a single tracked option.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::BadRequest`] for a blank option and
    /// [`QueryError::NotFound`] for an option that is not tracked.
    pub fn count(&self, option: &str) -> Result<OptionCount, QueryError> {
        let option = option.trim();
        if option.is_empty() {
            return Err(QueryError::BadRequest("option must not be empty".to_owned()));
        }
        if !self.store.options().contains(option) {
            return Err(QueryError::NotFound(format!("option {option:?} is not tracked")));
        }
        Ok(OptionCount {
            option: option.to_owned(),
            count: self.store.count(option),
        })
    }
}
