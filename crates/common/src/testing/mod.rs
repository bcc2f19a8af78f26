//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: waiting on asynchronous conditions with a deadline
//! - **[`logging`]**: test-scoped log output (`test-utils` feature)
//!
//! The clocks are re-exported here so tests only need one import path.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use arlm_common::testing::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.now() - start, Duration::from_secs(5));
//! ```

pub mod async_utils;
#[cfg(feature = "test-utils")]
pub mod logging;

pub use async_utils::{poll_until, timeout_ok};
#[cfg(feature = "test-utils")]
pub use logging::init_test_tracing;
pub use crate::time::{Clock, MockClock, SystemClock};
