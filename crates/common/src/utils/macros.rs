//! Declarative macros shared across the workspace

/// Implements `Display` and `FromStr` for state-like enums
///
/// `Display` writes the mapped lowercase string and `FromStr` parses it back
/// case-insensitively. Unknown input yields a message naming the enum.
///
/// # Example
///
/// ```rust
/// use arlm_common::impl_status_conversions;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum Phase {
///     Idle,
///     Running,
/// }
///
/// impl_status_conversions!(Phase {
///     Idle => "idle",
///     Running => "running",
/// });
///
/// assert_eq!(Phase::Running.to_string(), "running");
/// assert_eq!("IDLE".parse::<Phase>(), Ok(Phase::Idle));
/// ```
#[macro_export]
macro_rules! impl_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
