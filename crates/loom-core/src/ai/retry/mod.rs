//! Retry logic for model calls
//!
//! Exponential backoff with jitter for transient provider failures (network
//! errors, rate limits, timeouts). Invalid responses are never retried.

mod backoff;

pub use backoff::{with_retry, IsRetryable, RetryConfig, RetryError};
