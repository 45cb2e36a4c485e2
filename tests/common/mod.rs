// tests/common/mod.rs
//
// Shared setup for the integration suites.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Route library tracing output through the test harness. `RUST_LOG` selects
/// the verbosity; warnings only by default. Safe to call from every test;
/// only the first call in a test binary installs the subscriber.
pub fn init_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
