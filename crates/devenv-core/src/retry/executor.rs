//! Retry loop

use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Instant;

use crate::types::RetryPolicy;

use super::error::RetryError;
use super::observer::{NoOpObserver, RetryObserver};
use super::strategies::{calculate_delay, AlwaysRetry, RetryPredicate};

/// Retry `op` under `policy`, treating every error as retryable
pub async fn retry_with_policy<F, Fut, T, E>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + Send + 'static,
{
    RetryExecutor::<E, _, _>::new(policy.clone()).execute(op).await
}

/// Retry executor with a pluggable predicate and observer
///
/// ```rust
/// use devenv_core::retry::{ClosurePredicate, RetryExecutor, TracingObserver};
/// use devenv_core::types::RetryPolicy;
///
/// let executor = RetryExecutor::<std::io::Error, _, _>::new(RetryPolicy::default())
///     .with_predicate(ClosurePredicate::new(|e: &std::io::Error| {
///         e.kind() == std::io::ErrorKind::TimedOut
///     }))
///     .with_observer(TracingObserver::new("upload"));
/// ```
pub struct RetryExecutor<E, P, O> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    jitter: bool,
    _error: PhantomData<fn() -> E>,
}

impl<E> RetryExecutor<E, AlwaysRetry, NoOpObserver> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            predicate: AlwaysRetry,
            observer: NoOpObserver,
            jitter: true,
            _error: PhantomData,
        }
    }
}

impl<E, P, O> RetryExecutor<E, P, O> {
    pub fn with_predicate<P2>(self, predicate: P2) -> RetryExecutor<E, P2, O> {
        RetryExecutor {
            policy: self.policy,
            predicate,
            observer: self.observer,
            jitter: self.jitter,
            _error: PhantomData,
        }
    }

    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutor<E, P, O2> {
        RetryExecutor {
            policy: self.policy,
            predicate: self.predicate,
            observer,
            jitter: self.jitter,
            _error: PhantomData,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<E, P, O> RetryExecutor<E, P, O>
where
    E: Display + Send + 'static,
    P: RetryPredicate<E>,
    O: RetryObserver,
{
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            self.observer.on_attempt_start(attempt, max_attempts);

            let err = match op().await {
                Ok(value) => {
                    self.observer.on_success(attempt, start.elapsed());
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.predicate.should_retry(&err) {
                self.observer.on_cancelled(attempt, &err);
                return Err(RetryError::non_retryable(err));
            }

            if attempt >= max_attempts {
                self.observer.on_exhausted(attempt, &err);
                return Err(RetryError::exhausted(attempt, err, start.elapsed()));
            }

            let delay = calculate_delay(&self.policy, attempt, self.jitter);
            self.observer.on_attempt_failed(attempt, &err, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Err(RetryError::Cancelled {
            attempts: max_attempts,
        })
    }
}
