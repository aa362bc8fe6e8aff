use crate::error::{Error, Result};

/// Default root namespace for availability and state topics.
pub const TOPIC_ROOT: &str = "nvidia-smi";

/// Default Home Assistant MQTT discovery prefix.
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Builder for the MQTT topics a bridge publishes and subscribes to.
///
/// Topics follow the pattern:
/// - `<root>/availability`
/// - `<root>/<device_identifier>`
/// - `<discovery_prefix>/<component>/<object_id>/config`
/// - `<discovery_prefix>/status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    root: String,
    discovery_prefix: String,
}

impl Default for TopicBuilder {
    fn default() -> Self {
        Self::new(TOPIC_ROOT, DISCOVERY_PREFIX)
    }
}

impl TopicBuilder {
    /// Create a builder with a custom root and discovery prefix.
    pub fn new(root: impl Into<String>, discovery_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            discovery_prefix: discovery_prefix.into(),
        }
    }

    /// Topic carrying the retained `online`/`offline` flag.
    ///
    /// # Example
    /// ```
    /// use gpusight_common::topics::TopicBuilder;
    ///
    /// assert_eq!(TopicBuilder::default().availability(), "nvidia-smi/availability");
    /// ```
    pub fn availability(&self) -> String {
        format!("{}/availability", self.root)
    }

    /// Per-device state topic.
    ///
    /// # Example
    /// ```
    /// use gpusight_common::topics::TopicBuilder;
    ///
    /// let topics = TopicBuilder::default();
    /// assert_eq!(topics.state("GPU-1234"), "nvidia-smi/GPU-1234");
    /// ```
    pub fn state(&self, identifier: &str) -> String {
        format!("{}/{}", self.root, identifier)
    }

    /// Discovery config topic for a sensor entity.
    ///
    /// # Example
    /// ```
    /// use gpusight_common::topics::TopicBuilder;
    ///
    /// let topics = TopicBuilder::default();
    /// assert_eq!(
    ///     topics.sensor_config("GPU-1234_pwr"),
    ///     "homeassistant/sensor/GPU-1234_pwr/config"
    /// );
    /// ```
    pub fn sensor_config(&self, object_id: &str) -> String {
        self.discovery_config("sensor", object_id)
    }

    /// Discovery config topic for an arbitrary component type.
    pub fn discovery_config(&self, component: &str, object_id: &str) -> String {
        format!("{}/{}/{}/config", self.discovery_prefix, component, object_id)
    }

    /// Topic on which the platform announces its own restarts.
    pub fn platform_status(&self) -> String {
        format!("{}/status", self.discovery_prefix)
    }

    /// Check whether an incoming topic is the platform status topic.
    pub fn is_platform_status(&self, topic: &str) -> bool {
        topic
            .strip_prefix(self.discovery_prefix.as_str())
            .is_some_and(|rest| rest == "/status")
    }
}

/// Validate a single topic level used as an identifier.
///
/// Rejects empty levels, level separators, and MQTT wildcards.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::Topic("empty topic level".to_string()));
    }
    if let Some(c) = segment.chars().find(|c| matches!(c, '/' | '+' | '#' | '\0')) {
        return Err(Error::Topic(format!(
            "'{}' contains reserved character '{}'",
            segment,
            c.escape_default()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builder() {
        let topics = TopicBuilder::default();

        assert_eq!(topics.availability(), "nvidia-smi/availability");
        assert_eq!(topics.state("abc-123"), "nvidia-smi/abc-123");
        assert_eq!(
            topics.sensor_config("abc-123_sm"),
            "homeassistant/sensor/abc-123_sm/config"
        );
        assert_eq!(topics.platform_status(), "homeassistant/status");
    }

    #[test]
    fn test_custom_prefixes() {
        let topics = TopicBuilder::new("gpu", "ha");

        assert_eq!(topics.availability(), "gpu/availability");
        assert_eq!(
            topics.discovery_config("binary_sensor", "x"),
            "ha/binary_sensor/x/config"
        );
        assert!(topics.is_platform_status("ha/status"));
        assert!(!topics.is_platform_status("homeassistant/status"));
    }

    #[test]
    fn test_is_platform_status() {
        let topics = TopicBuilder::default();

        assert!(topics.is_platform_status("homeassistant/status"));
        assert!(!topics.is_platform_status("homeassistant/status/extra"));
        assert!(!topics.is_platform_status("homeassistantstatus"));
        assert!(!topics.is_platform_status("nvidia-smi/status"));
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("GPU-5b2f1c3e-0000").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("a+b").is_err());
        assert!(validate_segment("#").is_err());
    }
}
