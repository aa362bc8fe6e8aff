//! Bridge availability reporting.
//!
//! The availability topic carries a retained `online`/`offline` flag. The
//! broker publishes `offline` on the bridge's behalf through the last will
//! when the connection dies uncleanly.

use rumqttc::LastWill;

use gpusight_common::{Availability, TopicBuilder, retained_will};

use crate::Result;
use crate::publisher::{MessageSink, OutboundMessage};

/// Publishes the bridge's availability flag.
#[derive(Debug, Clone)]
pub struct AvailabilityPublisher {
    topic: String,
}

impl AvailabilityPublisher {
    /// Create a publisher for the availability topic of `topics`.
    pub fn new(topics: &TopicBuilder) -> Self {
        Self {
            topic: topics.availability(),
        }
    }

    /// Last-will message announcing `offline`, retained.
    pub fn last_will(&self) -> LastWill {
        retained_will(&self.topic, Availability::Offline.as_str())
    }

    /// Message announcing `availability`, retained.
    pub fn message(&self, availability: Availability) -> OutboundMessage {
        OutboundMessage::retained(&self.topic, availability.as_str())
    }

    /// Publish `availability`.
    pub async fn publish<S: MessageSink>(&self, sink: &S, availability: Availability) -> Result<()> {
        sink.send(self.message(availability)).await?;
        tracing::debug!(topic = %self.topic, %availability, "Published availability");
        Ok(())
    }

    /// Publish `online`.
    pub async fn publish_online<S: MessageSink>(&self, sink: &S) -> Result<()> {
        self.publish(sink, Availability::Online).await
    }

    /// Publish `offline`.
    pub async fn publish_offline<S: MessageSink>(&self, sink: &S) -> Result<()> {
        self.publish(sink, Availability::Offline).await
    }
}
