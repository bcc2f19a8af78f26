//! Log output for tests
//!
//! Installs a `tracing-subscriber` fmt layer writing through the test
//! harness capture, filtered by `RUST_LOG` (default `debug`).

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the test subscriber once per process
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}
