//! Backoff delay calculation and retryability predicates

use crate::types::{RetryPolicy, RetryStrategy};
use rand::Rng;
use std::time::Duration;

/// Delay to wait after `attempt` (1-indexed) fails
///
/// ```rust
/// use devenv_core::retry::calculate_delay;
/// use devenv_core::types::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(calculate_delay(&policy, 1, false).as_millis(), 1000);
/// assert_eq!(calculate_delay(&policy, 2, false).as_millis(), 2000);
/// assert_eq!(calculate_delay(&policy, 5, false).as_millis(), 8000);
/// ```
pub fn calculate_delay(policy: &RetryPolicy, attempt: u32, jitter: bool) -> Duration {
    let index = attempt.saturating_sub(1);

    let base_ms = match policy.strategy {
        RetryStrategy::None => 0,
        RetryStrategy::FixedDelay => policy.initial_delay_ms,
        RetryStrategy::ExponentialBackoff => {
            let factor = policy.backoff_multiplier.powf(f64::from(index));
            (policy.initial_delay_ms as f64 * factor) as u64
        }
        RetryStrategy::LinearBackoff => policy.initial_delay_ms * (u64::from(index) + 1),
    };

    let capped_ms = base_ms.min(policy.max_delay_ms);

    // Up to 25% jitter on top of the capped delay
    let final_ms = if jitter && capped_ms > 0 {
        capped_ms + rand::rng().random_range(0..=capped_ms / 4)
    } else {
        capped_ms
    };

    Duration::from_millis(final_ms)
}

/// Decides whether an error is worth another attempt
pub trait RetryPredicate<E: ?Sized>: Send + Sync {
    fn should_retry(&self, error: &E) -> bool;
}

/// Every error is retryable
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: ?Sized> RetryPredicate<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

/// No error is retryable
#[derive(Debug, Clone, Copy)]
pub struct NeverRetry;

impl<E: ?Sized> RetryPredicate<E> for NeverRetry {
    fn should_retry(&self, _error: &E) -> bool {
        false
    }
}

/// Predicate backed by a closure, e.g. `ClosurePredicate::new(StoreError::is_transient)`
pub struct ClosurePredicate<F> {
    predicate: F,
}

impl<F> ClosurePredicate<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<E, F> RetryPredicate<E> for ClosurePredicate<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn policy(strategy: RetryStrategy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            strategy,
            backoff_multiplier: 2.0,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
        }
    }

    #[test]
    fn test_none_strategy_is_zero() {
        let policy = policy(RetryStrategy::None);
        for attempt in 1..=5 {
            assert_eq!(calculate_delay(&policy, attempt, true), Duration::ZERO);
        }
    }

    #[test]
    fn test_fixed_and_linear() {
        let fixed = policy(RetryStrategy::FixedDelay);
        assert_eq!(calculate_delay(&fixed, 4, false), Duration::from_millis(100));

        let linear = policy(RetryStrategy::LinearBackoff);
        assert_eq!(calculate_delay(&linear, 1, false), Duration::from_millis(100));
        assert_eq!(calculate_delay(&linear, 3, false), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_is_capped() {
        let policy = policy(RetryStrategy::ExponentialBackoff);
        assert_eq!(calculate_delay(&policy, 1, false), Duration::from_millis(100));
        assert_eq!(calculate_delay(&policy, 3, false), Duration::from_millis(400));
        assert_eq!(calculate_delay(&policy, 10, false), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = policy(RetryStrategy::FixedDelay);
        for _ in 0..50 {
            let delay = calculate_delay(&policy, 1, true).as_millis();
            assert!((100..=125).contains(&delay));
        }
    }

    #[test]
    fn test_closure_predicate() {
        let predicate = ClosurePredicate::new(|e: &io::Error| e.kind() == io::ErrorKind::TimedOut);
        assert!(predicate.should_retry(&io::Error::new(io::ErrorKind::TimedOut, "t")));
        assert!(!predicate.should_retry(&io::Error::new(io::ErrorKind::PermissionDenied, "p")));
        assert!(RetryPredicate::<io::Error>::should_retry(&AlwaysRetry, &io::Error::other("x")));
        assert!(!RetryPredicate::<io::Error>::should_retry(&NeverRetry, &io::Error::other("x")));
    }
}
