//! Reconnection backoff policy
//!
//! One policy type serves both reconnect loops in the system: the broker
//! client retries on a fixed interval, the notification client doubles its
//! delay up to a cap. Both stop after `max_attempts` and stay stopped until
//! the caller triggers a fresh attempt.

use std::time::Duration;

/// Delay schedule for consecutive reconnection attempts.
///
/// Attempts are 1-based: `delay(1)` is the wait before the first retry.
/// `delay` returns `None` once the attempt number exceeds `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Fixed-interval policy: the same delay for every attempt.
    pub const fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self { base: delay, factor: 1, cap: delay, max_attempts }
    }

    /// Exponential policy: `base * factor^(attempt-1)`, clamped to `cap`.
    pub const fn exponential(base: Duration, factor: u32, cap: Duration, max_attempts: u32) -> Self {
        Self { base, factor, cap, max_attempts }
    }

    /// Delay before the given attempt, or `None` when the attempt budget
    /// is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        // Saturating: factor^(attempt-1) overflows quickly for long-lived
        // exponential policies even though max_attempts keeps it small here.
        let multiplier = self.factor.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(multiplier);
        Some(delay.min(self.cap))
    }
}
