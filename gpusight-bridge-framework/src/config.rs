//! Configuration traits and utilities.

use serde::de::DeserializeOwned;

use gpusight_common::load_config;

use crate::BridgeArgs;
use crate::error::{BridgeError, Result};
use crate::{LoggingConfig, MqttConfig, TopicBuilder};

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// layered loading (defaults, JSON5 file, `.env`, environment, CLI) and
/// validation.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use gpusight_bridge_framework::{BridgeConfig, LoggingConfig, MqttConfig, TopicBuilder};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyBridgeConfig {
///     #[serde(default)]
///     pub mqtt: MqttConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn mqtt(&self) -> &MqttConfig { &self.mqtt }
///     fn mqtt_mut(&mut self) -> &mut MqttConfig { &mut self.mqtt }
///     fn logging(&self) -> &LoggingConfig { &self.logging }
///     fn topics(&self) -> TopicBuilder { TopicBuilder::default() }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned + Default {
    /// Get the MQTT configuration.
    fn mqtt(&self) -> &MqttConfig;

    /// Get the MQTT configuration for in-place overrides.
    fn mqtt_mut(&mut self) -> &mut MqttConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Topics used by this bridge.
    fn topics(&self) -> TopicBuilder;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        validate_mqtt(self.mqtt())
    }

    /// Build the effective configuration from CLI arguments.
    ///
    /// Layers, lowest precedence first: built-in defaults, the JSON5 file,
    /// `.env`, `MQTT_*` environment variables, CLI overrides.
    fn from_args(args: &BridgeArgs, default_config: &str) -> Result<Self> {
        let (path, explicit) = args.config_path(default_config);

        let mut config: Self = if path.exists() {
            load_config(path)?
        } else if explicit {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        } else {
            Self::default()
        };

        // A missing .env file is the normal case.
        let _ = dotenvy::dotenv();
        config.mqtt_mut().apply_env()?;

        if let Some(broker) = &args.broker {
            config.mqtt_mut().host = broker.clone();
        }
        if let Some(port) = args.port {
            config.mqtt_mut().port = port;
        }

        config.validate()?;

        Ok(config)
    }

    /// Logging configuration with the CLI level override applied.
    fn effective_logging(&self, args: Option<&BridgeArgs>) -> LoggingConfig {
        let mut logging = self.logging().clone();
        if let Some(level) = args.and_then(|a| a.log_level.as_ref()) {
            logging.level = level.clone();
        }
        logging
    }
}

/// Validate the MQTT section shared by all bridges.
pub fn validate_mqtt(mqtt: &MqttConfig) -> Result<()> {
    if mqtt.host.trim().is_empty() {
        return Err(BridgeError::validation("mqtt.host must not be empty"));
    }
    if mqtt.port == 0 {
        return Err(BridgeError::validation("mqtt.port must be > 0"));
    }
    if mqtt.connect_timeout_secs == 0 {
        return Err(BridgeError::validation("mqtt.connect_timeout_secs must be > 0"));
    }
    if mqtt.keep_alive_secs < 5 {
        return Err(BridgeError::validation("mqtt.keep_alive_secs must be >= 5"));
    }
    if mqtt.channel_capacity == 0 {
        return Err(BridgeError::validation("mqtt.channel_capacity must be > 0"));
    }
    Ok(())
}
