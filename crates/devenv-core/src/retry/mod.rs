//! Policy-based retry engine for remote operations
//!
//! Object storage calls are retried with exponential backoff when the failure
//! is transient (throttling, 5xx, timeouts). A [`RetryPredicate`] decides
//! retryability so authentication failures short-circuit on the first attempt.
//!
//! # Example
//!
//! ```rust,no_run
//! use devenv_core::retry::{retry_with_policy, RetryError};
//! use devenv_core::types::RetryPolicy;
//!
//! async fn example() -> Result<String, RetryError<std::io::Error>> {
//!     let policy = RetryPolicy::default();
//!
//!     retry_with_policy(&policy, || async {
//!         Ok("uploaded".to_string())
//!     }).await
//! }
//! ```

mod error;
mod executor;
mod observer;
mod strategies;

pub use error::RetryError;
pub use executor::{retry_with_policy, RetryExecutor};
pub use observer::{NoOpObserver, RetryObserver, StatsObserver, TracingObserver};
pub use strategies::{calculate_delay, AlwaysRetry, ClosurePredicate, NeverRetry, RetryPredicate};
