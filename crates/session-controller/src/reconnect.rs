//! Reconnection controller: bounded, exponentially backed-off renegotiation.
//!
//! The controller only does the arithmetic - which attempt is next and how
//! long to wait. The session actor owns the single cancellable scheduled
//! task that realizes each delay; success (monitor back to live) resets the
//! counter, exhaustion escalates to termination with `connection_failed`.

use std::time::Duration;

/// Reconnection backoff state for one session.
#[derive(Debug)]
pub struct ReconnectController {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempts_issued: u32,
}

impl ReconnectController {
    /// New controller with the given backoff parameters.
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempts_issued: 0,
        }
    }

    /// Delay before the given attempt (1-based): `min(base * 2^(n-1), cap)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.cap)
    }

    /// Delay before the first attempt of a new backoff cycle. A `failed`
    /// signal is higher urgency: its first retry fires immediately.
    #[must_use]
    pub fn first_delay(&self, urgent: bool) -> Duration {
        if urgent {
            Duration::ZERO
        } else {
            self.delay_for(1)
        }
    }

    /// Record an issued attempt. Returns the attempt number, or `None`
    /// when the budget is exhausted.
    pub fn issue(&mut self) -> Option<u32> {
        if self.attempts_issued >= self.max_attempts {
            return None;
        }
        self.attempts_issued += 1;
        Some(self.attempts_issued)
    }

    /// Number of attempts issued in the current cycle.
    #[must_use]
    pub fn attempts_issued(&self) -> u32 {
        self.attempts_issued
    }

    /// Reset after a successful reconnection.
    pub fn reset(&mut self) {
        self.attempts_issued = 0;
    }
}
