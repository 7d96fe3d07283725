//! Logging initialization helpers

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `default_filter`. Safe to call more than once; only
/// the first call installs a subscriber.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
