//! Observation hooks for retry attempts

use std::fmt::Display;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receives callbacks while a retry loop runs
pub trait RetryObserver: Send + Sync {
    /// An attempt (1-indexed) is about to start
    fn on_attempt_start(&self, attempt: u32, max_attempts: u32);

    /// An attempt failed and the next one starts after `delay`
    fn on_attempt_failed(&self, attempt: u32, error: &dyn Display, delay: Duration);

    /// The operation succeeded
    fn on_success(&self, attempt: u32, total_duration: Duration);

    /// The final attempt failed
    fn on_exhausted(&self, attempts: u32, error: &dyn Display);

    /// The predicate rejected the error
    fn on_cancelled(&self, attempt: u32, error: &dyn Display) {
        let _ = (attempt, error);
    }
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {
    fn on_attempt_start(&self, _attempt: u32, _max_attempts: u32) {}
    fn on_attempt_failed(&self, _attempt: u32, _error: &dyn Display, _delay: Duration) {}
    fn on_success(&self, _attempt: u32, _total_duration: Duration) {}
    fn on_exhausted(&self, _attempts: u32, _error: &dyn Display) {}
}

/// Logs retry events through `tracing`, tagged with the operation name
///
/// Retries are logged at WARN so a slow backup explains itself without `-v`.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    operation: String,
}

impl TracingObserver {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl RetryObserver for TracingObserver {
    fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
        tracing::trace!(operation = %self.operation, attempt, max_attempts, "starting attempt");
    }

    fn on_attempt_failed(&self, attempt: u32, error: &dyn Display, delay: Duration) {
        tracing::warn!(
            operation = %self.operation,
            attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "retrying after transient failure"
        );
    }

    fn on_success(&self, attempt: u32, total_duration: Duration) {
        if attempt > 1 {
            tracing::info!(
                operation = %self.operation,
                attempt,
                total_duration_ms = total_duration.as_millis() as u64,
                "succeeded after retry"
            );
        }
    }

    fn on_exhausted(&self, attempts: u32, error: &dyn Display) {
        tracing::error!(operation = %self.operation, attempts, error = %error, "retries exhausted");
    }

    fn on_cancelled(&self, attempt: u32, error: &dyn Display) {
        tracing::debug!(operation = %self.operation, attempt, error = %error, "not retryable");
    }
}

/// Counts events; used by tests
#[derive(Debug, Default)]
pub struct StatsObserver {
    attempt_starts: AtomicU32,
    failures: AtomicU32,
    successes: AtomicU32,
    exhaustions: AtomicU32,
    cancellations: AtomicU32,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_starts(&self) -> u32 {
        self.attempt_starts.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn exhaustions(&self) -> u32 {
        self.exhaustions.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> u32 {
        self.cancellations.load(Ordering::SeqCst)
    }
}

impl RetryObserver for StatsObserver {
    fn on_attempt_start(&self, _attempt: u32, _max_attempts: u32) {
        self.attempt_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_failed(&self, _attempt: u32, _error: &dyn Display, _delay: Duration) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self, _attempt: u32, _total_duration: Duration) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exhausted(&self, _attempts: u32, _error: &dyn Display) {
        self.exhaustions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancelled(&self, _attempt: u32, _error: &dyn Display) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: RetryObserver + ?Sized> RetryObserver for Arc<T> {
    fn on_attempt_start(&self, attempt: u32, max_attempts: u32) {
        (**self).on_attempt_start(attempt, max_attempts)
    }

    fn on_attempt_failed(&self, attempt: u32, error: &dyn Display, delay: Duration) {
        (**self).on_attempt_failed(attempt, error, delay)
    }

    fn on_success(&self, attempt: u32, total_duration: Duration) {
        (**self).on_success(attempt, total_duration)
    }

    fn on_exhausted(&self, attempts: u32, error: &dyn Display) {
        (**self).on_exhausted(attempts, error)
    }

    fn on_cancelled(&self, attempt: u32, error: &dyn Display) {
        (**self).on_cancelled(attempt, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_observer_counts() {
        let observer = Arc::new(StatsObserver::new());
        observer.on_attempt_start(1, 3);
        observer.on_attempt_failed(1, &"SlowDown", Duration::from_millis(10));
        observer.on_attempt_start(2, 3);
        observer.on_success(2, Duration::from_millis(20));

        assert_eq!(observer.attempt_starts(), 2);
        assert_eq!(observer.failures(), 1);
        assert_eq!(observer.successes(), 1);
        assert_eq!(observer.exhaustions(), 0);
    }

    #[test]
    fn test_tracing_observer_name() {
        assert_eq!(TracingObserver::new("put files/notes.md").operation(), "put files/notes.md");
    }
}
