use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Environment variable holding the broker host.
pub const ENV_BROKER: &str = "MQTT_BROKER";
/// Environment variable holding the broker port.
pub const ENV_PORT: &str = "MQTT_PORT";
/// Environment variable holding the broker username.
pub const ENV_USERNAME: &str = "MQTT_USERNAME";
/// Environment variable holding the broker password.
pub const ENV_PASSWORD: &str = "MQTT_PASSWORD";
/// Environment variable holding the MQTT client identifier.
pub const ENV_CLIENT_ID: &str = "MQTT_CLIENT_ID";
/// Environment variable selecting plain or TLS transport.
pub const ENV_PROTOCOL: &str = "MQTT_PROTOCOL";

/// Transport used to reach the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttProtocol {
    /// Plain TCP.
    #[default]
    Mqtt,
    /// TLS, verified against the system root certificates.
    Mqtts,
}

impl MqttProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            MqttProtocol::Mqtt => "mqtt",
            MqttProtocol::Mqtts => "mqtts",
        }
    }
}

impl std::str::FromStr for MqttProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Ok(MqttProtocol::Mqtt),
            "mqtts" | "ssl" | "tls" => Ok(MqttProtocol::Mqtts),
            other => Err(Error::Config(format!(
                "Unsupported MQTT protocol '{}' (expected mqtt or mqtts)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MqttProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport: `mqtt` or `mqtts`.
    #[serde(default)]
    pub protocol: MqttProtocol,

    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password (only sent together with a username).
    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// How long to wait for the broker's CONNACK at startup.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Delay between reconnection attempts after the connection drops.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Capacity of the client's outgoing request queue.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "nvidia-ha-reporter".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: MqttProtocol::default(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl MqttConfig {
    /// Apply `MQTT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `MQTT_*` overrides using the given variable lookup.
    ///
    /// Empty username or password values clear the credential.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_BROKER).filter(|h| !h.trim().is_empty()) {
            self.host = host.trim().to_string();
        }

        if let Some(port) = lookup(ENV_PORT).filter(|p| !p.trim().is_empty()) {
            self.port = port.trim().parse().map_err(|e| {
                Error::Config(format!("Invalid {} value '{}': {}", ENV_PORT, port, e))
            })?;
        }

        if let Some(protocol) = lookup(ENV_PROTOCOL).filter(|p| !p.trim().is_empty()) {
            self.protocol = protocol.parse()?;
        }

        if let Some(username) = lookup(ENV_USERNAME) {
            self.username = non_empty(username);
        }

        if let Some(password) = lookup(ENV_PASSWORD) {
            self.password = non_empty(password);
        }

        if let Some(client_id) = lookup(ENV_CLIENT_ID).filter(|c| !c.trim().is_empty()) {
            self.client_id = client_id.trim().to_string();
        }

        Ok(())
    }

    /// Broker address as `host:port`, for logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// MQTT 3.1.1 only allows a password together with a username.
    pub fn password_without_username(&self) -> bool {
        self.password.is_some() && self.username.is_none()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration file in JSON5 format.
pub fn load_config<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        mqtt: MqttConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_config_sections() {
        let json5 = r#"
        {
            mqtt: {
                host: "broker.lan",
                port: 8883,
                username: "ha",
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: TestConfig = parse_config(json5).unwrap();

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.username.as_deref(), Some("ha"));
        assert_eq!(config.mqtt.password, None);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_default_config() {
        let config: TestConfig = parse_config("{}").unwrap();

        assert_eq!(config.mqtt.host, "127.0.0.1");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "nvidia-ha-reporter");
        assert!(config.mqtt.username.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"{ logging: { level: "debug", format: "json" } }"#;

        let config: TestConfig = parse_config(json5).unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MqttConfig::default();
        config
            .apply_env_from(env(&[
                (ENV_BROKER, "10.0.0.5"),
                (ENV_PORT, "1884"),
                (ENV_USERNAME, "user"),
                (ENV_PASSWORD, "secret"),
            ]))
            .unwrap();

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 1884);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.address(), "10.0.0.5:1884");
    }

    #[test]
    fn test_env_empty_credentials_clear() {
        let mut config = MqttConfig {
            username: Some("old".to_string()),
            password: Some("old".to_string()),
            ..Default::default()
        };
        config
            .apply_env_from(env(&[(ENV_USERNAME, ""), (ENV_PASSWORD, "")]))
            .unwrap();

        assert!(config.username.is_none());
        assert!(config.password.is_none());
    }

    #[test]
    fn test_env_missing_keeps_defaults() {
        let mut config = MqttConfig::default();
        config.apply_env_from(env(&[])).unwrap();
        assert_eq!(config, MqttConfig::default());
    }

    #[test]
    fn test_env_protocol() {
        let mut config = MqttConfig::default();
        assert_eq!(config.protocol, MqttProtocol::Mqtt);

        config.apply_env_from(env(&[(ENV_PROTOCOL, "MQTTS")])).unwrap();
        assert_eq!(config.protocol, MqttProtocol::Mqtts);

        let result = config.apply_env_from(env(&[(ENV_PROTOCOL, "ws")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_protocol_from_file() {
        let config: TestConfig = parse_config(r#"{ mqtt: { protocol: "mqtts", port: 8883 } }"#).unwrap();
        assert_eq!(config.mqtt.protocol, MqttProtocol::Mqtts);
    }

    #[test]
    fn test_env_password_without_username() {
        let mut config = MqttConfig::default();
        config.apply_env_from(env(&[(ENV_PASSWORD, "secret")])).unwrap();

        assert!(config.password_without_username());

        config.apply_env_from(env(&[(ENV_USERNAME, "user")])).unwrap();
        assert!(!config.password_without_username());
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = MqttConfig::default();
        let result = config.apply_env_from(env(&[(ENV_PORT, "not-a-port")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
