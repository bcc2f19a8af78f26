//! Error types for resource management
//!
//! - [`FetchError`]: what a producer fails with, classified as transient or
//!   permanent so the retry policy knows what to do with it
//! - [`ResourceError`]: failures of the manager API itself
//! - [`ReadError`]: the non-value outcomes of a suspense-style read

use std::time::Duration;

use arlm_common::error::{CommonError, ErrorClassification, ErrorSeverity};
use thiserror::Error;

use crate::key::ResourceKey;
use crate::suspense::PendingSignal;

/// Classified producer failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// A single attempt exceeded its timeout
    #[error("attempt timed out after {after:?}")]
    Timeout { after: Duration },

    /// Worth retrying: 5xx, connection reset, throttling
    #[error("transient failure: {message}")]
    Transient { message: String, retry_after: Option<Duration> },

    /// Never retried: 4xx, malformed payloads, domain rejections
    #[error("permanent failure: {message}")]
    Permanent { message: String },

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl FetchError {
    /// Retryable failure with no retry hint
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into(), retry_after: None }
    }

    /// Transient failure carrying a server-provided retry hint
    pub fn transient_after(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient { message: message.into(), retry_after: Some(retry_after) }
    }

    /// Failure that settles the entry without retrying
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { message: message.into() }
    }

    /// Classify an HTTP-style status code
    ///
    /// 408, 429 and 5xx are transient; every other status is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("status {}: {}", status, message.into());
        match status {
            408 | 429 | 500..=599 => Self::transient(message),
            _ => Self::permanent(message),
        }
    }

    /// Short machine-readable name, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::Common(inner) => inner.kind(),
        }
    }
}

impl ErrorClassification for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transient { .. } => true,
            Self::Permanent { .. } => false,
            Self::Common(inner) => inner.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout { .. } | Self::Transient { .. } => ErrorSeverity::Warning,
            Self::Permanent { .. } => ErrorSeverity::Error,
            Self::Common(inner) => inner.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Common(inner) if inner.is_critical())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            Self::Common(inner) => inner.retry_after(),
            _ => None,
        }
    }
}

/// Result type for producers
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors returned by the manager API
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    /// The descriptor could not be normalized into a key
    #[error("invalid resource key: {reason}")]
    InvalidKey { reason: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] CommonError),

    /// The fetch behind an awaited read settled as a failure
    #[error("fetch for '{key}' failed: {source}")]
    Fetch { key: ResourceKey, source: FetchError },

    /// Nothing was ever requested for the key, so there is nothing to read
    #[error("resource '{0}' has not been requested")]
    Unrequested(ResourceKey),

    /// The entry was evicted while a reader was waiting on it
    #[error("resource '{0}' was evicted while pending")]
    Cancelled(ResourceKey),

    /// Fetches and timers need a tokio runtime to run on
    #[error("no tokio runtime available to run fetches")]
    NoRuntime,
}

impl ResourceError {
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey { reason: reason.into() }
    }
}

pub type ResourceResult<T> = Result<T, ResourceError>;

/// Non-value outcomes of [`ResourceManager::read`](crate::ResourceManager::read)
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    /// Still loading; await the signal, then read again
    #[error("resource is pending")]
    Pending(PendingSignal),

    /// The last fetch settled as a failure
    #[error(transparent)]
    Failed(FetchError),

    #[error("resource '{0}' has not been requested")]
    Unrequested(ResourceKey),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl ReadError {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Take the pending signal out, if this is a pending outcome
    pub fn into_signal(self) -> Option<PendingSignal> {
        match self {
            Self::Pending(signal) => Some(signal),
            _ => None,
        }
    }
}
