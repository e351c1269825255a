//! Reconnect policy: bounded retries with exponential backoff.

use std::time::Duration;

/// Default number of reconnect attempts allowed without an event in between.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling on the reconnect delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How the consumer retries after a transient disconnect.
///
/// The budget is spent across reconnects until the stream delivers an
/// event; a connection that drops before anything arrives does not refill
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts before giving up.
    pub max_retries: u32,
    /// Delay before the first attempt; doubles for each further attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before zero-based reconnect attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        // cap the shift so the multiplier stays representable
        let factor = 1_u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
