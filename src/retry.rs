//! Bounded retry policies for batch delivery.

use std::time::Duration;

/// Default exponential multiplier when not specified.
pub const DEFAULT_EXPONENTIAL_MULTIPLIER: f64 = 2.0;

/// Delay strategy applied between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Backoff {
    /// No delay between retries (immediate retry).
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed { delay: Duration },
    /// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped at
    /// `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

/// A bounded retry policy: how many attempts in total, and how long to wait
/// between them. Whatever survives the final attempt is non-retryable and
/// is up to the caller to dispose of.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBackoff {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryBackoff {
    /// A single attempt, no retries.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// Up to `max_attempts` attempts with a fixed delay between them.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        assert!(max_attempts > 0, "max_attempts must be greater than 0");
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Up to `max_attempts` attempts with exponential backoff capped at
    /// `max`.
    pub fn exponential(max_attempts: u32, initial: Duration, multiplier: f64, max: Duration) -> Self {
        assert!(max_attempts > 0, "max_attempts must be greater than 0");
        assert!(multiplier >= 1.0, "multiplier must be at least 1.0");
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                initial,
                multiplier,
                max,
            },
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The delay to sleep after the `attempt`-th failed attempt (1-based),
    /// or `None` when attempts are exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let delay = match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                initial.mul_f64(factor).min(max)
            }
        };
        Some(delay)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::exponential(
            3,
            Duration::from_millis(100),
            DEFAULT_EXPONENTIAL_MULTIPLIER,
            Duration::from_secs(5),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_exhausts_after_first_attempt() {
        assert_eq!(RetryBackoff::no_retry().delay_after(1), None);
    }

    #[test]
    fn fixed_returns_constant_delay_until_exhausted() {
        let policy = RetryBackoff::fixed(3, Duration::from_millis(50));
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[test]
    fn exponential_grows_and_caps() {
        let policy = RetryBackoff::exponential(
            5,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(300),
        );
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(200)));
        // capped
        assert_eq!(policy.delay_after(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay_after(4), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay_after(5), None);
    }

    #[test]
    #[should_panic(expected = "max_attempts")]
    fn zero_attempts_is_rejected() {
        let _ = RetryBackoff::fixed(0, Duration::ZERO);
    }
}
