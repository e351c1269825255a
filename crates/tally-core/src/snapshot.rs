//! Immutable point-in-time copies of the tally.
//!
//! A [`TallySnapshot`] is what leaves the store: the broadcaster publishes
//! it and the snapshot responder returns it. It serializes to a flat JSON
//! object keyed by option, in configuration order:
//!
//! ```json
//! {"Messi": 2, "Suarez": 1}
//! ```

use serde::ser::{Serialize, SerializeMap, Serializer};

/// A single `(option, count)` pair inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionCount {
    /// The tracked option.
    pub option: String,
    /// Its count at the instant the snapshot was taken.
    pub count: u64,
}

/// Immutable copy of every tracked option and its count at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallySnapshot {
    entries: Vec<OptionCount>,
}

impl TallySnapshot {
    pub(crate) const fn new(entries: Vec<OptionCount>) -> Self {
        Self { entries }
    }

    /// Count recorded for `option`, or `None` when it is not tracked.
    pub fn get(&self, option: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.option == option)
            .map(|entry| entry.count)
    }

    /// Sum of all counts, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.entries
            .iter()
            .fold(0_u64, |acc, entry| acc.saturating_add(entry.count))
    }

    /// Number of options in the snapshot.
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no options.
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &OptionCount> {
        self.entries.iter()
    }

    /// Iterate option names in configuration order.
    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.option.as_str())
    }
}

impl Serialize for TallySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.option, &entry.count)?;
        }
        map.end()
    }
}
