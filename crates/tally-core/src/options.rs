//! The fixed set of tracked keyword options.
//!
//! A [`TrackedOptions`] value can only be built through validation, so any
//! code holding one knows it has 2 or 3 unique, trimmed, non-empty entries.

use crate::ConfigurationError;

/// Minimum number of tracked options.
pub const MIN_OPTIONS: usize = 2;

/// Maximum number of tracked options.
pub const MAX_OPTIONS: usize = 3;

/// A validated, ordered, immutable list of tracked options.
///
/// Order is the order the options were configured in; it is preserved in
/// snapshots so downstream charts keep a stable column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOptions {
    options: Box<[String]>,
}

impl TrackedOptions {
    /// Validate a raw option list.
    ///
    /// Each entry is trimmed. The result must hold between [`MIN_OPTIONS`]
    /// and [`MAX_OPTIONS`] entries, none empty, none repeated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] describing the first violation found.
    pub fn new<I, S>(raw: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let trimmed: Vec<String> = raw
            .into_iter()
            .map(|s| s.as_ref().trim().to_owned())
            .collect();

        let count = trimmed.len();
        if count < MIN_OPTIONS {
            return Err(ConfigurationError::TooFewOptions { count });
        }
        if count > MAX_OPTIONS {
            return Err(ConfigurationError::TooManyOptions { count });
        }

        for (position, option) in trimmed.iter().enumerate() {
            if option.is_empty() {
                return Err(ConfigurationError::EmptyOption { position });
            }
            if trimmed.iter().take(position).any(|earlier| earlier == option) {
                return Err(ConfigurationError::DuplicateOption {
                    option: option.clone(),
                });
            }
        }

        Ok(Self {
            options: trimmed.into_boxed_slice(),
        })
    }

    /// Parse and validate a comma-delimited option list such as
    /// `"Messi, Suarez,Trump"`.
    ///
    /// # Errors
    ///
    /// Same as [`TrackedOptions::new`].
    pub fn parse_delimited(raw: &str) -> Result<Self, ConfigurationError> {
        Self::new(raw.split(','))
    }

    /// Position of `option` (trimmed) in the set, if tracked.
    pub fn position(&self, option: &str) -> Option<usize> {
        let option = option.trim();
        self.options.iter().position(|tracked| tracked == option)
    }

    /// Whether `option` (trimmed) is tracked.
    pub fn contains(&self, option: &str) -> bool {
        self.position(option).is_some()
    }

    /// Number of tracked options.
    pub const fn len(&self) -> usize {
        self.options.len()
    }

    /// Always `false`; a validated set is never empty.
    pub const fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Iterate the options in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(String::as_str)
    }

    /// Borrow the options as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.options
    }
}
