//! Resilience patterns for fault tolerance
//!
//! Currently this is the retry machinery used by the resource manager:
//! - **Retry policy**: decides whether a failed attempt runs again, using
//!   error classification and a bounded attempt count
//! - **Backoff and jitter**: exponential delays capped at a maximum, with a
//!   small uniform random spread so synchronized clients drift apart
//! - **Executor**: drives the loop and exposes an observer hook between
//!   attempts for cooperative cancellation

pub mod retry;

pub use retry::{
    policies, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder, RetryDecision,
    RetryError, RetryExecutor, RetryObserver, RetryOutcome, RetryPolicy, RetryResult,
};
