//! Retry policies for transient action failures.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ActionError;

/// Computes the wait before an attempt from its number and the last error.
pub type DelayFn = Arc<dyn Fn(u32, &ActionError) -> Duration + Send + Sync>;

/// How long to wait between attempts.
#[derive(Clone)]
pub enum RetryDelay {
    Fixed(Duration),
    /// Receives the number of the attempt about to run: 2 for the first retry.
    Computed(DelayFn),
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Retry configuration for an action.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub delay: RetryDelay,
}

impl RetryPolicy {
    /// Constant delay between attempts.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: RetryDelay::Fixed(delay),
        }
    }

    /// Delay computed per attempt.
    #[must_use]
    pub fn computed(
        max_attempts: u32,
        delay: impl Fn(u32, &ActionError) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: RetryDelay::Computed(Arc::new(delay)),
        }
    }

    /// `2^attempt * base`, where `attempt` starts at 2 for the first retry.
    #[must_use]
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self::computed(max_attempts, move |attempt, _| {
            base.saturating_mul(2_u32.saturating_pow(attempt))
        })
    }

    /// Whether an attempt with this number may run.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Wait before running `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, err: &ActionError) -> Duration {
        match &self.delay {
            RetryDelay::Fixed(d) => *d,
            RetryDelay::Computed(f) => f(attempt, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn err() -> ActionError {
        ActionError::new(ErrorCode::Error, "flaky")
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let policy = RetryPolicy::fixed(0, Duration::from_millis(5));
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    #[test]
    fn exponential_uses_attempt_number() {
        let policy = RetryPolicy::exponential(4, Duration::from_millis(10));
        assert_eq!(policy.delay_for(2, &err()), Duration::from_millis(40));
        assert_eq!(policy.delay_for(3, &err()), Duration::from_millis(80));
        assert_eq!(policy.delay_for(4, &err()), Duration::from_millis(160));
    }

    #[test]
    fn computed_sees_the_error() {
        let policy = RetryPolicy::computed(3, |_, e| {
            if e.code == ErrorCode::TooManyRequests {
                Duration::from_secs(1)
            } else {
                Duration::ZERO
            }
        });
        let limited = ActionError::new(ErrorCode::TooManyRequests, "slow down");
        assert_eq!(policy.delay_for(2, &limited), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, &err()), Duration::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn attempts_are_bounded_by_max(max in 0u32..10) {
            let policy = RetryPolicy::fixed(max, Duration::ZERO);
            proptest::prop_assert!(policy.allows(1));
            proptest::prop_assert!(!policy.allows(max.max(1) + 1));
        }
    }
}
