//! Retry policy and executor for fallible async operations
//!
//! The policy answers one question: given an error and the number of retries
//! already made, should the operation run again, and after how long? Only
//! errors that classify themselves as retryable (see
//! [`ErrorClassification`]) are eligible, and `max_attempts` bounds the total
//! number of attempts regardless of classification.
//!
//! The default delay is exponential (`base * 2^retry_count`, capped at a
//! maximum) plus a uniform random jitter of up to 10% of the delay.
//!
//! [`RetryExecutor`] drives the loop and lets a [`RetryObserver`] watch (and
//! abandon) it between attempts. The resource manager uses that hook to
//! publish the retry count and to stop retrying work nobody wants anymore.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::{CommonError, ErrorClassification};

/// Errors that end a retry sequence without a value
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts have been exhausted
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    AttemptsExhausted { attempts: u32, source: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable { source: E },

    /// The observer abandoned the sequence between attempts
    #[error("Retry abandoned after {attempts} attempts")]
    Abandoned { attempts: u32 },
}

impl<E> RetryError<E> {
    /// The last error produced by the operation, if the sequence ended on one
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::AttemptsExhausted { source, .. } | Self::NonRetryable { source } => Some(source),
            Self::Abandoned { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Outcome of a retry execution including result and summary statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    /// Attempts made, including the first one
    pub attempts: u32,
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Consume the outcome and return only the result.
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }

    /// Retries made on top of the first attempt
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation after the given delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide on the next step after `error`, given the retries already made
    /// for the current unit of work.
    fn should_retry(&self, error: &E, retry_count: u32, config: &RetryConfig) -> RetryDecision;
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Exponential backoff: initial_delay * base^retry_count, capped at max_delay
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay before retry number `retry_count + 1`
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        match self {
            BackoffStrategy::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
                let delay = initial_delay.as_millis() as f64 * base.powi(exponent);
                let delay_ms = delay.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(delay_ms)
            }
        }
    }

    /// Upper bound of the computed (pre-jitter) delay
    pub fn max_delay(&self) -> Duration {
        match self {
            BackoffStrategy::Exponential { max_delay, .. } => *max_delay,
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Adds a uniform random amount in `[0, delay * ratio]`
    Proportional { ratio: f64 },
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Proportional { ratio } => {
                let spread = (delay.as_millis() as f64 * ratio.clamp(0.0, 1.0)) as u64;
                delay + Duration::from_millis(random_up_to(spread))
            }
        }
    }
}

fn random_up_to(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Jitter type for randomizing delays
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(100),
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
            jitter: Jitter::Proportional { ratio: 0.1 },
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// A configuration that never retries
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Delay before retry number `retry_count + 1`, jitter included
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.jitter.apply(self.backoff.calculate_delay(retry_count))
    }

    /// Whether another attempt is allowed once `retry_count` retries were made
    pub fn has_attempts_left(&self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) < self.max_attempts
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CommonError> {
        if self.max_attempts == 0 {
            return Err(CommonError::config_field(
                "retry.max_attempts",
                "max_attempts must be greater than 0",
            ));
        }

        match &self.backoff {
            BackoffStrategy::Exponential { base, .. } if *base <= 0.0 => {
                return Err(CommonError::config_field(
                    "retry.backoff",
                    "exponential base must be greater than 0",
                ));
            }
            BackoffStrategy::Exponential { initial_delay, max_delay, .. }
                if initial_delay > max_delay =>
            {
                return Err(CommonError::config_field(
                    "retry.base_delay_ms",
                    "base delay must not exceed max delay",
                ));
            }
            _ => {}
        }

        if let Jitter::Proportional { ratio } = self.jitter {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(CommonError::config_field(
                    "retry.jitter_ratio",
                    "jitter ratio must be within [0, 1]",
                ));
            }
        }

        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn exponential_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, base: 2.0, max_delay };
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    pub fn proportional_jitter(mut self, ratio: f64) -> Self {
        self.config.jitter = Jitter::Proportional { ratio };
        self
    }

    pub fn build(self) -> Result<RetryConfig, CommonError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Hook invoked by [`RetryExecutor`] between attempts
///
/// Returning `false` from either method abandons the sequence with
/// [`RetryError::Abandoned`].
pub trait RetryObserver<E> {
    /// Called once a retry is sanctioned, before the backoff wait.
    /// `retry_count` is the count after this retry is accounted for.
    fn on_retry(&mut self, _retry_count: u32, _delay: Duration, _error: &E) -> bool {
        true
    }

    /// Called after the backoff wait, right before the next attempt
    fn should_continue(&mut self) -> bool {
        true
    }
}

impl<E> RetryObserver<E> for () {}

impl<E, O: RetryObserver<E> + ?Sized> RetryObserver<E> for &mut O {
    fn on_retry(&mut self, retry_count: u32, delay: Duration, error: &E) -> bool {
        (**self).on_retry(retry_count, delay, error)
    }

    fn should_continue(&mut self) -> bool {
        (**self).should_continue()
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_observed(operation, ()).await.into_result()
    }

    /// Execute an operation with retry logic, reporting to `observer`
    /// between attempts, and return outcome statistics.
    #[instrument(skip_all, fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_observed<F, Fut, T, E, O>(
        &self,
        mut operation: F,
        mut observer: O,
    ) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: RetryObserver<E>,
    {
        let mut retry_count = 0u32;
        let mut total_delay = Duration::ZERO;

        loop {
            let attempts = retry_count + 1;
            debug!("Executing operation (attempt {}/{})", attempts, self.config.max_attempts);

            let error = match operation().await {
                Ok(value) => {
                    if retry_count > 0 {
                        debug!("Operation succeeded after {} retries", retry_count);
                    }
                    return RetryOutcome { result: Ok(value), attempts, total_delay };
                }
                Err(error) => error,
            };

            let delay = match self.policy.should_retry(&error, retry_count, &self.config) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::Stop if !self.config.has_attempts_left(retry_count) => {
                    warn!(
                        "All retry attempts exhausted after {} tries, last error: {:?}",
                        attempts, error
                    );
                    return RetryOutcome {
                        result: Err(RetryError::AttemptsExhausted { attempts, source: error }),
                        attempts,
                        total_delay,
                    };
                }
                RetryDecision::Stop => {
                    debug!("Retry policy determined not to retry: {:?}", error);
                    return RetryOutcome {
                        result: Err(RetryError::NonRetryable { source: error }),
                        attempts,
                        total_delay,
                    };
                }
            };

            retry_count += 1;
            if !observer.on_retry(retry_count, delay, &error) {
                debug!("Retry abandoned by observer before backoff");
                return RetryOutcome {
                    result: Err(RetryError::Abandoned { attempts }),
                    attempts,
                    total_delay,
                };
            }

            warn!(
                "Operation failed (attempt {}), retrying after {:?}: {:?}",
                attempts, delay, error
            );
            tokio::time::sleep(delay).await;
            total_delay += delay;

            if !observer.should_continue() {
                debug!("Retry abandoned by observer after backoff");
                return RetryOutcome {
                    result: Err(RetryError::Abandoned { attempts }),
                    attempts,
                    total_delay,
                };
            }
        }
    }
}

/// Pre-defined retry policies
pub mod policies {
    use super::*;

    /// Retries errors that classify themselves as retryable, honoring their
    /// `retry_after` hint (capped at the backoff maximum).
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ClassifiedRetry;

    impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
        fn should_retry(&self, error: &E, retry_count: u32, config: &RetryConfig) -> RetryDecision {
            if !config.has_attempts_left(retry_count) || !error.is_retryable() {
                return RetryDecision::Stop;
            }

            let delay = match error.retry_after() {
                Some(hint) => hint.min(config.backoff.max_delay()),
                None => config.delay_for(retry_count),
            };
            RetryDecision::RetryAfter(delay)
        }
    }
}
