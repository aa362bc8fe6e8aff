//! MQTT bridge for NVIDIA GPU telemetry.
//!
//! Enumerates GPUs with `nvidia-smi --query-gpu`, streams
//! `nvidia-smi dmon --format csv` and publishes every sample as JSON on a
//! per-GPU state topic. Home Assistant discovery configs make each metric
//! appear as a sensor entity.
//!
//! # Topics
//!
//! ```text
//! nvidia-smi/availability                         retained "online" | "offline"
//! nvidia-smi/<uuid>                               {"pwr":71,"gtemp":45,"mtemp":null,...}
//! homeassistant/sensor/<uuid>_<code>/config       retained discovery payload
//! homeassistant/status                            subscribed; triggers rediscovery
//! ```

pub mod config;
pub mod discovery;
pub mod metrics;
pub mod monitor;
pub mod parser;
pub mod registry;
pub mod router;
pub mod supervisor;
