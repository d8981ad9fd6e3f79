//! Tracing subscriber setup.

use crate::config::{ConfigError, ConfigResult, LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber for `config`.
///
/// `RUST_LOG` overrides the configured filter. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(config: &LoggingConfig) -> ConfigResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| ConfigError::Validation(format!("invalid log filter: {}", e)))?;

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_thread_names(config.include_thread_names)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_names(config.include_thread_names),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_thread_names(config.include_thread_names),
            )
            .try_init(),
    };

    result.map_err(|e| ConfigError::Validation(format!("failed to install subscriber: {}", e)))
}
