//! Retry timing after transport failures.
//!
//! Exponential growth in whole seconds, floored at one second so a
//! failing endpoint is never hammered in a hot loop, and capped at a
//! configurable ceiling (60 s by default).

use std::time::Duration;

/// Default upper bound on a single retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

const MIN_DELAY_SECS: u64 = 1;

/// Consecutive-failure counter with exponential delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    max_secs: u64,
}

impl Backoff {
    /// Backoff with the default 60 s ceiling.
    pub fn new() -> Self {
        Self::with_max(DEFAULT_MAX_DELAY)
    }

    /// Backoff with a custom ceiling (never below the 1 s floor).
    pub fn with_max(max: Duration) -> Self {
        Self {
            failures: 0,
            max_secs: max.as_secs().max(MIN_DELAY_SECS),
        }
    }

    /// `clamp(2^failures, 1, max)` seconds.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let secs = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
        Duration::from_secs(secs.clamp(MIN_DELAY_SECS, self.max_secs))
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Record a success; the next failure starts from the floor again.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Number of consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
