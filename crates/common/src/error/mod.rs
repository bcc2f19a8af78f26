//! Error classification shared by the ARLM crates
//!
//! Retry decisions never inspect concrete error types. The retry policy asks
//! the error, through [`ErrorClassification`], whether it is transient and
//! whether it carries its own retry delay. Any error type joins the scheme by
//! implementing the trait; [`CommonError`] covers the failure shapes that
//! producers and configuration loading have in common.
//!
//! Crate errors wrap `CommonError` instead of repeating its variants and
//! delegate classification to it:
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum FetchError {
//!     #[error("permanent failure: {message}")]
//!     Permanent { message: String },
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//! ```
//!
//! | Variant | Retryable | Severity |
//! |---------|-----------|----------|
//! | `RateLimited` | yes | Warning |
//! | `Config` | no | Error |
//! | `Serialization` | no | Error |
//! | `Internal` | no | Critical |

use std::fmt;
use std::time::Duration;

pub type CommonResult<T> = Result<T, CommonError>;

/// Failure shapes shared across the workspace
#[derive(Debug, Clone, PartialEq)]
pub enum CommonError {
    /// Invalid or unreadable configuration
    Config { message: String, field: Option<String> },

    /// A payload or config file could not be decoded
    Serialization { message: String, format: Option<String> },

    /// Upstream asked the caller to slow down
    RateLimited { retry_after: Option<Duration> },

    /// Broken internal invariant, including a producer that panicked
    Internal { message: String },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field: Some(field) } => {
                write!(f, "invalid configuration for '{}': {}", field, message)
            }
            Self::Config { message, field: None } => {
                write!(f, "invalid configuration: {}", message)
            }
            Self::Serialization { message, format: Some(format) } => {
                write!(f, "cannot decode {}: {}", format, message)
            }
            Self::Serialization { message, format: None } => {
                write!(f, "cannot decode: {}", message)
            }
            Self::RateLimited { retry_after: Some(after) } => {
                write!(f, "rate limited, retry in {:?}", after)
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RateLimited { .. } => ErrorSeverity::Warning,
            Self::Internal { .. } => ErrorSeverity::Critical,
            Self::Config { .. } | Self::Serialization { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl CommonError {
    /// Configuration error not tied to a single field
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Configuration error pinned to a field or variable name
    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Decoding failure for a payload in `format` (`"toml"`, `"json"`)
    pub fn serialization_format(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Rate limiting, with the wait the upstream asked for if it sent one
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Broken invariant; never retried and always critical
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Short machine-readable name, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Serialization { .. } => "serialization",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal { .. } => "internal",
        }
    }
}

/// How an error should be treated by retry loops and logging
pub trait ErrorClassification {
    /// Transient failures (timeouts, 5xx, connection resets, rate limiting)
    /// that may succeed when attempted again
    fn is_retryable(&self) -> bool;

    fn severity(&self) -> ErrorSeverity;

    fn is_critical(&self) -> bool;

    /// Delay the error itself asks for, e.g. from a `Retry-After` header
    fn retry_after(&self) -> Option<Duration>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}
