//! Time utilities and abstractions
//!
//! - **[`clock`]**: real and mock clocks for freshness/grace arithmetic
//! - **[`timer`]**: cancellable one-shot timers
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use arlm_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.now() - start, Duration::from_secs(5));
//! ```

pub mod clock;
pub mod timer;

pub use clock::{Clock, MockClock, SystemClock};
pub use timer::{schedule, TimerHandle};
