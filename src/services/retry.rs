//! Retry policy for transient provider failures: attempt budget plus
//! exponential backoff, with a longer base for rate limits.

use std::time::Duration;

use crate::models::job::ErrorClass;

/// Backoff base for rate-limit errors, regardless of the configured base.
/// Upstream throttling windows run longer than generic 5xx blips.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per job, including the first.
    pub max_attempts: u32,
    /// Base delay multiplier for exponential backoff.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    /// Delay before the next attempt, where `attempt` is the 1-based number
    /// of the attempt that just failed: `base * 2^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32, class: ErrorClass) -> Duration {
        let base = if class == ErrorClass::RateLimited {
            RATE_LIMIT_BACKOFF
        } else {
            self.base_backoff
        };
        base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_delay(1, ErrorClass::ServerError),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.backoff_delay(2, ErrorClass::ServerError),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.backoff_delay(3, ErrorClass::Transport),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_rate_limit_uses_five_second_base() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(
            policy.backoff_delay(1, ErrorClass::RateLimited),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.backoff_delay(2, ErrorClass::RateLimited),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_configured_base_applies_to_non_rate_limit() {
        let policy = RetryPolicy::new(4, Duration::from_millis(250));
        assert_eq!(
            policy.backoff_delay(2, ErrorClass::ServerError),
            Duration::from_millis(500)
        );
    }
}
