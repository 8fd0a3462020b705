//! Structured logging initialization.
//!
//! The RUST_LOG environment variable takes precedence over the configured level.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Builds the level filter: RUST_LOG if set, the configured level otherwise.
fn filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.as_str())
    }
}

/// Initialize the logging subsystem.
///
/// Must be called once, before the first event is emitted.
///
/// # Example
///
/// ```ignore
/// use tempkey::config::LoggingConfig;
/// use tempkey::logging;
///
/// logging::init(&LoggingConfig::default());
/// tracing::info!("tempkey starting");
/// ```
pub fn init(config: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(filter(config));

    match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(config.target)
                    .with_thread_ids(false),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(config.target))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_uses_configured_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "tempkey=debug".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(filter(&config).to_string(), "tempkey=debug");
    }
}
