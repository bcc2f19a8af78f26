//! Small shared helpers
//!
//! - **[`macros`]**: `impl_status_conversions!` for lowercase state enums
//! - **[`serde`]**: `duration_millis` for millisecond config fields

#[macro_use]
pub mod macros;
pub mod serde;

pub use self::serde::{duration_millis, option_duration_millis};
