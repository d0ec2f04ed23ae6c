use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

const FALLBACK_FILTER: &str = "info";

/// Install the global fmt subscriber. `RUST_LOG` overrides the configured
/// filter. Returns `false` when a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let (filter, rejected) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, None),
        Err(_) => match EnvFilter::try_new(&config.filter) {
            Ok(filter) => (filter, None),
            Err(err) => (EnvFilter::new(FALLBACK_FILTER), Some(err)),
        },
    };

    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    };

    if let Some(err) = rejected {
        warn!(filter = %config.filter, %err, "invalid log filter, using {FALLBACK_FILTER}");
    }
    installed
}
