//! The tally store: the single source of truth for option counts.
//!
//! # Locking
//!
//! Option names are immutable after [`TallyStore::init`] and live outside
//! the lock. Only the fixed-size count array sits behind a
//! [`parking_lot::RwLock`]:
//!
//! - [`increment`](TallyStore::increment) takes the write lock;
//! - [`snapshot`](TallyStore::snapshot) and [`count`](TallyStore::count)
//!   take the read lock and may run concurrently with each other.
//!
//! Guards are held only for the in-memory read or bump and are never held
//! across an `.await`, so no task can stall the others on I/O.

use parking_lot::RwLock;
use tracing::trace;

use crate::options::TrackedOptions;
use crate::snapshot::{OptionCount, TallySnapshot};
use crate::ConfigurationError;

/// Concurrency-safe mapping from tracked option to a non-negative counter.
///
/// Share it between tasks as `Arc<TallyStore>`. The option set is fixed at
/// construction; unknown options passed to [`increment`] are ignored rather
/// than added, so adversarial input cannot grow memory.
///
/// [`increment`]: TallyStore::increment
#[derive(Debug)]
pub struct TallyStore {
    options: TrackedOptions,
    counts: RwLock<Box<[u64]>>,
}

impl TallyStore {
    /// Build a store from a raw option list, with every count at zero.
    ///
    /// Options are trimmed and validated (2 or 3, non-empty, unique).
    /// Construction is the only way to obtain a store, so it cannot be
    /// initialised twice.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when the option list is invalid.
    pub fn init<I, S>(options: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TrackedOptions::new(options).map(Self::with_options)
    }

    /// Build a store from an already validated option set.
    pub fn with_options(options: TrackedOptions) -> Self {
        let counts = vec![0_u64; options.len()].into_boxed_slice();
        Self {
            options,
            counts: RwLock::new(counts),
        }
    }

    /// The fixed option set.
    pub const fn options(&self) -> &TrackedOptions {
        &self.options
    }

    /// Add one to `option`'s count.
    ///
    /// `option` is trimmed first. Returns `true` if it matched a tracked
    /// option, `false` (and changes nothing) otherwise.
    pub fn increment(&self, option: &str) -> bool {
        let Some(index) = self.options.position(option) else {
            trace!(option, "ignoring increment for untracked option");
            return false;
        };

        let mut counts = self.counts.write();
        match counts.get_mut(index) {
            Some(count) => {
                *count = count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Current count for `option` (trimmed), or 0 if it is not tracked.
    pub fn count(&self, option: &str) -> u64 {
        self.options
            .position(option)
            .and_then(|index| self.counts.read().get(index).copied())
            .unwrap_or(0)
    }

    /// Copy every option and its count as of a single instant.
    ///
    /// The copy is taken under one read guard; option names are attached
    /// after the guard is released.
    pub fn snapshot(&self) -> TallySnapshot {
        let counts: Vec<u64> = self.counts.read().to_vec();

        let entries = self
            .options
            .iter()
            .zip(counts)
            .map(|(option, count)| OptionCount {
                option: option.to_owned(),
                count,
            })
            .collect();

        TallySnapshot::new(entries)
    }
}
