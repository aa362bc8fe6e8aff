//! Home Assistant MQTT discovery.
//!
//! One retained config per (GPU, metric) pair on
//! `<discovery_prefix>/sensor/<uuid>_<code>/config`, followed by a retained
//! `online` on the availability topic. Payloads depend only on the registry
//! and the metric table, so republishing is idempotent.

use serde::Serialize;

use gpusight_bridge_framework::{
    AvailabilityPublisher, MessageSink, OutboundMessage, PublishStats, Result, TopicBuilder,
    send_batch,
};

use crate::config::NvidiaConfig;
use crate::metrics::{METRICS, MetricDescriptor};
use crate::registry::{Device, DeviceRegistry};

/// Discovery payload for one sensor entity.
#[derive(Debug, Serialize)]
pub struct SensorConfig<'a> {
    pub device: DeviceInfo<'a>,
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'a str>,
    pub value_template: String,
    pub unique_id: String,
    pub state_class: &'static str,
    pub expire_after: u64,
    pub enabled_by_default: bool,
    pub availability_topic: String,
    pub state_topic: String,
}

/// Device block shared by all entities of one GPU.
#[derive(Debug, Serialize)]
pub struct DeviceInfo<'a> {
    pub name: &'a str,
    pub identifiers: [&'a str; 1],
    pub manufacturer: &'a str,
    pub model: &'a str,
}

/// Builds and publishes discovery configs.
#[derive(Debug, Clone)]
pub struct DiscoveryPublisher {
    topics: TopicBuilder,
    availability: AvailabilityPublisher,
    metrics: &'static [MetricDescriptor],
    manufacturer: String,
    expire_after_secs: u64,
}

impl DiscoveryPublisher {
    /// Publisher for the full `dmon` metric table.
    pub fn new(topics: TopicBuilder, config: &NvidiaConfig) -> Self {
        Self::with_metrics(topics, config, METRICS)
    }

    /// Publisher for a custom metric table.
    pub fn with_metrics(
        topics: TopicBuilder,
        config: &NvidiaConfig,
        metrics: &'static [MetricDescriptor],
    ) -> Self {
        Self {
            availability: AvailabilityPublisher::new(&topics),
            topics,
            metrics,
            manufacturer: config.manufacturer.clone(),
            expire_after_secs: config.expire_after_secs,
        }
    }

    /// Unique id of a sensor entity: `<identifier>_<code>`.
    pub fn unique_id(device: &Device, metric: &MetricDescriptor) -> String {
        format!("{}_{}", device.identifier, metric.code)
    }

    /// Discovery payload for one (device, metric) pair.
    pub fn sensor_config<'a>(
        &'a self,
        device: &'a Device,
        metric: &'a MetricDescriptor,
    ) -> SensorConfig<'a> {
        SensorConfig {
            device: DeviceInfo {
                name: &device.name,
                identifiers: [&device.identifier],
                manufacturer: &self.manufacturer,
                model: &device.name,
            },
            name: metric.name,
            device_class: metric.device_class,
            unit_of_measurement: metric.unit,
            value_template: format!("{{{{ value_json.{} }}}}", metric.code),
            unique_id: Self::unique_id(device, metric),
            state_class: "measurement",
            expire_after: self.expire_after_secs,
            enabled_by_default: true,
            availability_topic: self.topics.availability(),
            state_topic: self.topics.state(&device.identifier),
        }
    }

    /// All discovery config messages, device by device in index order.
    pub fn config_messages(&self, registry: &DeviceRegistry) -> Result<Vec<OutboundMessage>> {
        let mut messages = Vec::with_capacity(registry.len() * self.metrics.len());

        for device in registry.iter() {
            for metric in self.metrics {
                let config = self.sensor_config(device, metric);
                let topic = self.topics.sensor_config(&config.unique_id);
                messages.push(OutboundMessage::retained_json(topic, &config)?);
            }
        }

        Ok(messages)
    }

    /// Publish every config, then `online`.
    ///
    /// Individual failures are logged and counted; they do not stop the
    /// remaining messages.
    pub async fn publish<S: MessageSink>(
        &self,
        sink: &S,
        registry: &DeviceRegistry,
    ) -> Result<PublishStats> {
        let messages = self.config_messages(registry)?;
        let mut stats = send_batch(sink, messages).await;

        match self.availability.publish_online(sink).await {
            Ok(()) => stats.success += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(error = %e, "Failed to publish online availability");
            }
        }

        tracing::info!(
            devices = registry.len(),
            published = stats.success,
            failed = stats.failed,
            "Published discovery configs"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpusight_bridge_framework::testing::RecordingSink;
    use serde_json::{Value, json};

    static TWO_METRICS: &[MetricDescriptor] = &[
        MetricDescriptor {
            code: "pwr",
            name: "Power Usage",
            device_class: Some("power"),
            unit: Some("W"),
        },
        MetricDescriptor {
            code: "sm",
            name: "SM Util",
            device_class: None,
            unit: Some("%"),
        },
    ];

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new([Device {
            index: 0,
            name: "GPU0".to_string(),
            identifier: "abc-123".to_string(),
        }])
        .unwrap()
    }

    fn publisher() -> DiscoveryPublisher {
        DiscoveryPublisher::with_metrics(
            TopicBuilder::default(),
            &NvidiaConfig::default(),
            TWO_METRICS,
        )
    }

    #[tokio::test]
    async fn test_two_configs_then_online() {
        let sink = RecordingSink::new();
        let stats = publisher().publish(&sink, &registry()).await.unwrap();

        assert_eq!(stats, PublishStats { success: 3, failed: 0 });

        let messages = sink.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.retain));
        assert_eq!(
            sink.topics(),
            vec![
                "homeassistant/sensor/abc-123_pwr/config",
                "homeassistant/sensor/abc-123_sm/config",
                "nvidia-smi/availability",
            ]
        );

        let first: Value = serde_json::from_slice(&messages[0].payload).unwrap();
        let second: Value = serde_json::from_slice(&messages[1].payload).unwrap();
        assert_eq!(first["unique_id"], "abc-123_pwr");
        assert_eq!(second["unique_id"], "abc-123_sm");
        assert_eq!(messages[2].payload_str(), "online");
    }

    #[test]
    fn test_payload_contents() {
        let registry = registry();
        let publisher = publisher();
        let device = registry.get(0).unwrap();

        let config = publisher.sensor_config(device, &TWO_METRICS[0]);
        let value = serde_json::to_value(&config).unwrap();

        assert_eq!(
            value,
            json!({
                "device": {
                    "name": "GPU0",
                    "identifiers": ["abc-123"],
                    "manufacturer": "NVIDIA",
                    "model": "GPU0"
                },
                "name": "Power Usage",
                "device_class": "power",
                "unit_of_measurement": "W",
                "value_template": "{{ value_json.pwr }}",
                "unique_id": "abc-123_pwr",
                "state_class": "measurement",
                "expire_after": 60,
                "enabled_by_default": true,
                "availability_topic": "nvidia-smi/availability",
                "state_topic": "nvidia-smi/abc-123"
            })
        );
    }

    #[test]
    fn test_missing_device_class_is_omitted() {
        let registry = registry();
        let publisher = publisher();
        let config = publisher.sensor_config(registry.get(0).unwrap(), &TWO_METRICS[1]);
        let value = serde_json::to_value(&config).unwrap();

        assert!(value.get("device_class").is_none());
        assert_eq!(value["unit_of_measurement"], "%");
    }

    #[tokio::test]
    async fn test_republish_is_byte_identical() {
        let sink = RecordingSink::new();
        let publisher = publisher();
        let registry = registry();

        publisher.publish(&sink, &registry).await.unwrap();
        let first = sink.take();
        publisher.publish(&sink, &registry).await.unwrap();
        let second = sink.take();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_config_does_not_stop_the_rest() {
        let sink = RecordingSink::new();
        sink.fail_topic("homeassistant/sensor/abc-123_pwr/config");

        let stats = publisher().publish(&sink, &registry()).await.unwrap();

        assert_eq!(stats, PublishStats { success: 2, failed: 1 });
        assert_eq!(sink.topics().last().map(String::as_str), Some("nvidia-smi/availability"));
    }

    #[test]
    fn test_full_table_per_device() {
        let registry = DeviceRegistry::new([
            Device {
                index: 0,
                name: "A".to_string(),
                identifier: "id-a".to_string(),
            },
            Device {
                index: 1,
                name: "B".to_string(),
                identifier: "id-b".to_string(),
            },
        ])
        .unwrap();
        let publisher = DiscoveryPublisher::new(TopicBuilder::default(), &NvidiaConfig::default());

        let messages = publisher.config_messages(&registry).unwrap();
        assert_eq!(messages.len(), 2 * METRICS.len());
        assert_eq!(messages[0].topic, "homeassistant/sensor/id-a_pwr/config");
        assert_eq!(
            messages[METRICS.len()].topic,
            "homeassistant/sensor/id-b_pwr/config"
        );
    }
}
