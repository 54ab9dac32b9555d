use std::time::Duration;

use common::consts::{DEFAULT_RETRY_MAX_DELAY, ERROR_REQUEUE_DELAY, RETRY_DELAY};

/// Capped exponential backoff keyed on the number of consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Backoff for failed creates, starting at the fixed retry delay.
    pub fn write_retry(max: Duration) -> Self {
        Self::new(RETRY_DELAY, max)
    }

    /// Backoff the dispatcher applies when a run fails outright.
    pub fn redelivery(max: Duration) -> Self {
        Self::new(ERROR_REQUEUE_DELAY, max)
    }

    /// Delay after `failures` earlier consecutive failures: base, 2×base, 4×base...
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::write_retry(DEFAULT_RETRY_MAX_DELAY)
    }
}
