//! Capped exponential backoff for listener re-binds.

use std::time::Duration;

pub const MIN_DELAY: Duration = Duration::from_millis(5);
pub const MAX_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next attempt: 5ms, then doubling, never above 1s.
    pub fn next_delay(&mut self) -> Duration {
        self.delay = (self.delay * 2).max(MIN_DELAY).min(MAX_DELAY);
        self.delay
    }

    pub fn reset(&mut self) {
        self.delay = Duration::ZERO;
    }

    pub fn current(&self) -> Duration {
        self.delay
    }
}
