//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// MQTT connection could not be established.
    #[error("MQTT connection error: {0}")]
    MqttConnection(String),

    /// MQTT client request failed.
    #[error("MQTT client error: {0}")]
    MqttClient(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing error.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Shutdown did not finish within its grace period.
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(std::time::Duration),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a publish error for `topic`.
    pub fn publish(topic: impl Into<String>, message: impl ToString) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.to_string(),
        }
    }
}

impl From<gpusight_common::Error> for BridgeError {
    fn from(err: gpusight_common::Error) -> Self {
        match err {
            gpusight_common::Error::Config(msg) => Self::Config(msg),
            gpusight_common::Error::Connection(msg) => Self::MqttConnection(msg),
            gpusight_common::Error::Client(e) => Self::MqttClient(e.to_string()),
            gpusight_common::Error::Json(e) => Self::Serialization(e.to_string()),
            gpusight_common::Error::Io(e) => Self::Io(e),
            gpusight_common::Error::Topic(msg) => Self::Config(msg),
        }
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        Self::MqttClient(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_error_mapping() {
        let err: BridgeError = gpusight_common::Error::Connection("refused".to_string()).into();
        assert!(matches!(err, BridgeError::MqttConnection(ref m) if m == "refused"));

        let err: BridgeError = gpusight_common::Error::Config("bad".to_string()).into();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_publish_error_display() {
        let err = BridgeError::publish("nvidia-smi/availability", "queue full");
        assert_eq!(
            err.to_string(),
            "Failed to publish to nvidia-smi/availability: queue full"
        );
    }
}
