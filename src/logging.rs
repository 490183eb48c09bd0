use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Structured logging for the whole service. Production gets JSON lines for
/// the log aggregator; development keeps the human-readable format.
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.production {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
