//! Logging setup.
//!
//! Filters come from the `BLOOD_BANK_LOG` environment variable using the
//! usual `EnvFilter` directive syntax, e.g. `BLOOD_BANK_LOG=blood_bank=debug`.
use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// ENV used to set the log level
const FILTER_ENV: &str = "BLOOD_BANK_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_LEVEL));
        // another subscriber (a test harness, an embedding binary) may already be set
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
