//! Asynchronous resource lifecycle manager.
//!
//! A [`ResourceManager`] caches the outcome of asynchronous producers under
//! normalized keys and coordinates everything around them:
//!
//! - **Deduplication**: concurrent requests for one key share a fetch
//! - **Generations**: every new unit of work supersedes the previous one, and
//!   late completions of superseded work are dropped
//! - **Retry**: transient failures are retried with capped, jittered
//!   exponential backoff
//! - **Subscriptions**: callbacks see a snapshot after every mutation, in
//!   mutation order
//! - **Suspense-style reads**: [`ResourceManager::read`] returns the value or
//!   a [`PendingSignal`] to await before reading again
//! - **Debounce and eviction**: bursts collapse into one request and
//!   unobserved entries are reclaimed after a grace period
//!
//! # Example
//!
//! ```no_run
//! use arlm_core::{FetchError, ManagerConfig, ResourceManager};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager: ResourceManager<String> = ResourceManager::new(ManagerConfig::default())?;
//!
//! let fetch_name = || async { Ok::<_, FetchError>("Ada".to_string()) };
//! manager.request("user:1", fetch_name, manager.options())?;
//! let name = manager.read_async("user:1").await?;
//! assert_eq!(name, "Ada");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod debounce;
pub mod entry;
pub mod error;
pub mod key;
pub mod manager;
pub mod producer;
pub mod stats;
mod store;
pub mod subscription;
pub mod suspense;

pub use config::{ManagerConfig, RequestOptions, RetrySettings};
pub use debounce::DebounceGate;
pub use entry::{EntrySnapshot, Generation, ResourceEntry, ResourceState};
pub use error::{FetchError, FetchResult, ReadError, ResourceError, ResourceResult};
pub use key::{KeyCodec, RequestDescriptor, ResourceKey};
pub use manager::{RequestOutcome, ResourceManager};
pub use producer::{with_timeout, Producer};
pub use stats::ManagerStats;
pub use subscription::{Callback, SubscriptionHandle};
pub use suspense::{PendingSignal, ReadState};
