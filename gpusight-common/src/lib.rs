//! GpuSight Common Library
//!
//! This crate provides shared types and utilities for GpuSight MQTT bridges:
//!
//! - [`telemetry`] - Metric values and availability (`MetricValue`, `Availability`)
//! - [`config`] - Configuration loading (JSON5 format, `MQTT_*` environment overrides)
//! - [`session`] - MQTT session setup with last-will registration
//! - [`topics`] - Topic builders for state, availability and discovery
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod topics;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, MqttConfig, MqttProtocol, load_config, parse_config};
pub use error::{Error, Result};
pub use session::{MqttSession, connect, mqtt_options, retained_will};
pub use telemetry::{ABSENT_MARKER, Availability, MetricValue};
pub use topics::{DISCOVERY_PREFIX, TOPIC_ROOT, TopicBuilder, validate_segment};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set.
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
