//! Error returned when a retried operation gives up

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Outcome of a failed retry loop, generic over the operation's error type
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted {
        /// Number of attempts made before giving up
        attempts: u32,
        /// The error from the final attempt
        source: E,
        /// Total time spent across all attempts
        total_duration: Duration,
    },

    /// The policy allowed no attempts at all
    Cancelled { attempts: u32 },

    /// The predicate rejected the error, so no further attempts were made
    NonRetryable(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                source,
                total_duration,
            } => write!(
                f,
                "gave up after {} attempts over {:.2}s: {}",
                attempts,
                total_duration.as_secs_f64(),
                source
            ),
            RetryError::Cancelled { attempts } => {
                write!(f, "retry cancelled after {} attempts", attempts)
            }
            RetryError::NonRetryable(source) => write!(f, "{}", source),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable(source) => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}

impl<E> RetryError<E> {
    pub fn exhausted(attempts: u32, source: E, total_duration: Duration) -> Self {
        RetryError::Exhausted {
            attempts,
            source,
            total_duration,
        }
    }

    pub fn non_retryable(source: E) -> Self {
        RetryError::NonRetryable(source)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    pub fn is_non_retryable(&self) -> bool {
        matches!(self, RetryError::NonRetryable(_))
    }

    /// Number of attempts that were made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts } => {
                *attempts
            }
            RetryError::NonRetryable(_) => 1,
        }
    }

    /// The underlying operation error, if one was captured
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable(source) => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }

    /// Borrow the underlying operation error, if any
    pub fn inner(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable(source) => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}
