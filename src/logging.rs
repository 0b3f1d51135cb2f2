//! Tracing initialisation for harness users.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Install a global subscriber.
///
/// `RUST_LOG` wins over `config.filter`. Returns `false` if a subscriber was
/// already installed (for example by an earlier test in the same binary),
/// in which case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::constants::DEFAULT_LOG_FILTER));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_test_writer())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init()
    };

    installed.is_ok()
}
