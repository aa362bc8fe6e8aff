//! Configuration for the nvidia-smi bridge.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use gpusight_bridge_framework::{
    BridgeConfig, BridgeError, LoggingConfig, MqttConfig, Result, TopicBuilder, validate_mqtt,
};
use gpusight_common::{DISCOVERY_PREFIX, TOPIC_ROOT};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "nvidia-smi.json5";

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NvidiaBridgeConfig {
    /// MQTT connection settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// GPU sampling and publishing settings.
    #[serde(default)]
    pub nvidia: NvidiaConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GPU sampling and publishing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvidiaConfig {
    /// The `nvidia-smi` executable (default: "nvidia-smi", resolved via PATH).
    #[serde(default = "default_command")]
    pub command: String,

    /// Metric groups passed to `dmon -s` (default: "pucvmet").
    #[serde(default = "default_dmon_groups")]
    pub dmon_groups: String,

    /// Root topic for availability and state (default: "nvidia-smi").
    #[serde(default = "default_topic_root")]
    pub topic_root: String,

    /// Home Assistant discovery prefix (default: "homeassistant").
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Manufacturer shown on discovered devices (default: "NVIDIA").
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    /// Seconds without an update before a sensor becomes unavailable (default: 60).
    #[serde(default = "default_expire_after")]
    pub expire_after_secs: u64,

    /// Seconds to wait for `dmon` to exit after SIGTERM before killing it (default: 5).
    #[serde(default = "default_terminate_timeout")]
    pub terminate_timeout_secs: u64,

    /// Seconds allowed to flush the offline message on shutdown (default: 5).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Number of raw lines buffered between the reader and the parser (default: 256).
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,
}

fn default_command() -> String {
    "nvidia-smi".to_string()
}

fn default_dmon_groups() -> String {
    "pucvmet".to_string()
}

fn default_topic_root() -> String {
    TOPIC_ROOT.to_string()
}

fn default_discovery_prefix() -> String {
    DISCOVERY_PREFIX.to_string()
}

fn default_manufacturer() -> String {
    "NVIDIA".to_string()
}

fn default_expire_after() -> u64 {
    60
}

fn default_terminate_timeout() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_line_buffer() -> usize {
    256
}

impl Default for NvidiaConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            dmon_groups: default_dmon_groups(),
            topic_root: default_topic_root(),
            discovery_prefix: default_discovery_prefix(),
            manufacturer: default_manufacturer(),
            expire_after_secs: default_expire_after(),
            terminate_timeout_secs: default_terminate_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            line_buffer: default_line_buffer(),
        }
    }
}

impl NvidiaConfig {
    /// Arguments for the streaming `dmon` invocation.
    pub fn dmon_args(&self) -> Vec<String> {
        vec![
            "dmon".to_string(),
            "--format".to_string(),
            "csv".to_string(),
            "-s".to_string(),
            self.dmon_groups.clone(),
        ]
    }

    /// Arguments for the one-shot device enumeration query.
    pub fn query_args(&self) -> Vec<String> {
        vec![
            "--query-gpu=index,name,uuid".to_string(),
            "--format=csv,noheader".to_string(),
        ]
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl BridgeConfig for NvidiaBridgeConfig {
    fn mqtt(&self) -> &MqttConfig {
        &self.mqtt
    }

    fn mqtt_mut(&mut self) -> &mut MqttConfig {
        &mut self.mqtt
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn topics(&self) -> TopicBuilder {
        TopicBuilder::new(&self.nvidia.topic_root, &self.nvidia.discovery_prefix)
    }

    fn validate(&self) -> Result<()> {
        validate_mqtt(&self.mqtt)?;

        let nvidia = &self.nvidia;
        if nvidia.command.trim().is_empty() {
            return Err(BridgeError::validation("nvidia.command must not be empty"));
        }
        if nvidia.dmon_groups.trim().is_empty() {
            return Err(BridgeError::validation("nvidia.dmon_groups must not be empty"));
        }
        for (field, value) in [
            ("nvidia.topic_root", &nvidia.topic_root),
            ("nvidia.discovery_prefix", &nvidia.discovery_prefix),
        ] {
            if value.is_empty() || value.contains(['+', '#']) || value.ends_with('/') {
                return Err(BridgeError::validation(format!(
                    "{} must be a non-empty topic without wildcards or a trailing '/'",
                    field
                )));
            }
        }
        if nvidia.expire_after_secs == 0 {
            return Err(BridgeError::validation("nvidia.expire_after_secs must be > 0"));
        }
        if nvidia.terminate_timeout_secs == 0 {
            return Err(BridgeError::validation(
                "nvidia.terminate_timeout_secs must be > 0",
            ));
        }
        if nvidia.shutdown_grace_secs == 0 {
            return Err(BridgeError::validation(
                "nvidia.shutdown_grace_secs must be > 0",
            ));
        }
        if nvidia.line_buffer == 0 {
            return Err(BridgeError::validation("nvidia.line_buffer must be > 0"));
        }

        Ok(())
    }
}
