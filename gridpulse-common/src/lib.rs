//! GridPulse Common Library
//!
//! Shared types and utilities for the GridPulse energy-telemetry bridge:
//!
//! - [`record`] - Canonical telemetry record and push-channel wire shape
//! - [`normalize`] - Payload normalization (alias table, device-id rules)
//! - [`config`] - Configuration loading (JSON5 + environment overrides)
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod normalize;
pub mod record;

// Re-export commonly used types at the crate root
pub use config::{
    BridgeConfig, BrokerConfig, BrokerEndpoint, HttpConfig, LogFormat, LoggingConfig,
    PrimaryStoreConfig, SecondaryStoreConfig,
};
pub use error::{Error, Result};
pub use normalize::{device_id_from_topic, normalize};
pub use record::{Metrics, PushEvent, TelemetryRecord, current_timestamp_millis, iso_from_millis};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports text
/// (default) and JSON output formats.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
