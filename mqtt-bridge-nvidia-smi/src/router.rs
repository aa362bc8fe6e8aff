//! Routes parsed samples to per-GPU state topics.

use std::sync::Arc;

use gpusight_bridge_framework::{MessageSink, OutboundMessage, TopicBuilder};

use crate::parser::Sample;
use crate::registry::DeviceRegistry;

/// What happened to a routed sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the device's state topic.
    Published { identifier: String },
    /// No GPU with this index was enumerated at startup.
    UnknownDevice(u32),
    /// The publish could not be queued.
    Dropped,
}

/// Publishes each sample as a non-retained JSON object on `<root>/<uuid>`.
#[derive(Debug, Clone)]
pub struct PublishRouter {
    registry: Arc<DeviceRegistry>,
    topics: TopicBuilder,
}

impl PublishRouter {
    pub fn new(registry: Arc<DeviceRegistry>, topics: TopicBuilder) -> Self {
        Self { registry, topics }
    }

    /// Route one sample. Never blocks; never fails the stream.
    pub fn route<S: MessageSink>(&self, sample: &Sample, sink: &S) -> RouteOutcome {
        let Some(device) = self.registry.get(sample.device_index) else {
            tracing::debug!(index = sample.device_index, "Sample for unknown GPU index");
            return RouteOutcome::UnknownDevice(sample.device_index);
        };

        let topic = self.topics.state(&device.identifier);
        let message = match OutboundMessage::transient_json(&topic, &sample.values) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Failed to encode state");
                return RouteOutcome::Dropped;
            }
        };

        match sink.try_send(message) {
            Ok(()) => {
                tracing::trace!(device = %device.identifier, topic = %topic, "Published state");
                RouteOutcome::Published {
                    identifier: device.identifier.clone(),
                }
            }
            Err(e) => {
                tracing::debug!(device = %device.identifier, error = %e, "Dropped state update");
                RouteOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Device;
    use gpusight_bridge_framework::MetricValue;
    use gpusight_bridge_framework::testing::RecordingSink;
    use std::collections::BTreeMap;

    fn router() -> PublishRouter {
        let registry = DeviceRegistry::new([Device {
            index: 0,
            name: "GPU0".to_string(),
            identifier: "abc-123".to_string(),
        }])
        .unwrap();
        PublishRouter::new(Arc::new(registry), TopicBuilder::default())
    }

    fn sample(index: u32) -> Sample {
        let mut values = BTreeMap::new();
        values.insert("pwr".to_string(), MetricValue::Integer(71));
        values.insert("mtemp".to_string(), MetricValue::Absent);
        Sample {
            device_index: index,
            values,
        }
    }

    #[test]
    fn test_known_device_published() {
        let sink = RecordingSink::new();
        let outcome = router().route(&sample(0), &sink);

        assert_eq!(
            outcome,
            RouteOutcome::Published {
                identifier: "abc-123".to_string()
            }
        );

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "nvidia-smi/abc-123");
        assert!(!messages[0].retain);
        assert_eq!(messages[0].payload_str(), r#"{"mtemp":null,"pwr":71}"#);
    }

    #[test]
    fn test_unknown_device_routes_nowhere() {
        let sink = RecordingSink::new();
        assert_eq!(router().route(&sample(2), &sink), RouteOutcome::UnknownDevice(2));
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_full_queue_drops_sample() {
        let sink = RecordingSink::with_capacity(1);
        let router = router();

        assert!(matches!(
            router.route(&sample(0), &sink),
            RouteOutcome::Published { .. }
        ));
        assert_eq!(router.route(&sample(0), &sink), RouteOutcome::Dropped);
        assert_eq!(sink.messages().len(), 1);
    }
}
