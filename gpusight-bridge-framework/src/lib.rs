//! GpuSight Bridge Framework
//!
//! Common abstractions for building bridges that publish telemetry to MQTT.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for layered configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (connect, event pump, shutdown)
//! - [`Publisher`] and the [`MessageSink`] seam for outbound messages
//! - [`AvailabilityPublisher`] for the retained online/offline flag and last will
//! - [`BusEvent`], the closed set of broker events a bridge reacts to
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use gpusight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, shutdown_signal};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse();
//!     let config = MyBridgeConfig::from_args(&args, "mybridge.json5")?;
//!     BridgeRunner::init_logging(&config, Some(&args))?;
//!
//!     let mut runner = BridgeRunner::connect("mybridge", &config).await?;
//!     runner.spawn(my_worker(runner.publisher()));
//!
//!     shutdown_signal().await;
//!     runner.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod availability;
mod config;
mod error;
mod events;
mod publisher;
mod runner;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use args::BridgeArgs;
pub use availability::AvailabilityPublisher;
pub use config::{BridgeConfig, validate_mqtt};
pub use error::{BridgeError, Result};
pub use events::BusEvent;
pub use publisher::{MessageSink, OutboundMessage, PublishStats, Publisher, send_batch};
pub use runner::{BridgeRunner, shutdown_signal, sign_off};

// Re-export commonly used types from gpusight-common
pub use gpusight_common::{
    Availability, LoggingConfig, MetricValue, MqttConfig, TopicBuilder,
};
