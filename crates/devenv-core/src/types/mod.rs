//! Shared configuration types

mod retry;

pub use retry::{RetryPolicy, RetryStrategy};
