//! Retry pacing for watch reconnects.

use std::time::Duration;

/// An endless iterator of doubling delays, capped at a maximum.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial: u64,
    current: u64,
    max: Duration,
}

impl ExponentialBackoff {
    /// Start at `initial` milliseconds, doubling up to `max` per step.
    pub const fn from_millis(initial: u64, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max,
        }
    }

    /// Drop back to the initial delay, after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = Duration::from_millis(self.current).min(self.max);
        self.current = self.current.saturating_mul(2);
        Some(delay)
    }
}
