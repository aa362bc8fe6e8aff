//! Message publisher for MQTT.

use std::future::Future;
use std::sync::Arc;

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;

use gpusight_common::TopicBuilder;

use crate::error::{BridgeError, Result};

/// A message queued for the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    /// A retained QoS 1 message (discovery configs, availability).
    pub fn retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    /// A non-retained QoS 0 message (state updates).
    pub fn transient(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    /// A retained message with a JSON payload.
    pub fn retained_json<T: Serialize>(topic: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::retained(topic, serde_json::to_vec(value)?))
    }

    /// A non-retained message with a JSON payload.
    pub fn transient_json<T: Serialize>(topic: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::transient(topic, serde_json::to_vec(value)?))
    }

    /// Payload as UTF-8 text, lossy.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Destination for outbound requests.
///
/// Implemented by [`Publisher`] over the MQTT client; tests substitute an
/// in-memory sink.
pub trait MessageSink: Send + Sync {
    /// Queue a message, waiting for room in the outgoing queue.
    fn send(&self, message: OutboundMessage) -> impl Future<Output = Result<()>> + Send;

    /// Queue a message without waiting. Fails when the queue is full.
    fn try_send(&self, message: OutboundMessage) -> Result<()>;

    /// Subscribe to a topic at QoS 1.
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<()>> + Send;

    /// Request a clean DISCONNECT after everything queued so far.
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Publisher for sending messages to the MQTT broker.
///
/// Wraps a cloneable [`AsyncClient`]; the client serialises requests from
/// all clones through its request queue, so a `Publisher` can be shared
/// freely between tasks.
#[derive(Clone, Debug)]
pub struct Publisher {
    client: AsyncClient,
    topics: TopicBuilder,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(client: AsyncClient, topics: TopicBuilder) -> Self {
        Self { client, topics }
    }

    /// Get the topic builder.
    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }
}

impl MessageSink for Publisher {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let topic = message.topic.clone();
        self.client
            .publish(message.topic, message.qos, message.retain, message.payload)
            .await
            .map_err(|e| BridgeError::publish(topic, e))
    }

    fn try_send(&self, message: OutboundMessage) -> Result<()> {
        let topic = message.topic.clone();
        self.client
            .try_publish(message.topic, message.qos, message.retain, message.payload)
            .map_err(|e| BridgeError::publish(topic, e))
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(BridgeError::from)
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await.map_err(BridgeError::from)
    }
}

impl<T: MessageSink> MessageSink for Arc<T> {
    fn send(&self, message: OutboundMessage) -> impl Future<Output = Result<()>> + Send {
        (**self).send(message)
    }

    fn try_send(&self, message: OutboundMessage) -> Result<()> {
        (**self).try_send(message)
    }

    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).subscribe(topic)
    }

    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).disconnect()
    }
}

/// Send each message through `sink`, counting successes and failures.
pub async fn send_batch<S, I>(sink: &S, messages: I) -> PublishStats
where
    S: MessageSink,
    I: IntoIterator<Item = OutboundMessage>,
{
    let mut stats = PublishStats::default();

    for message in messages {
        match sink.send(message).await {
            Ok(()) => stats.success += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(error = %e, "Failed to publish message");
            }
        }
    }

    stats
}

/// Statistics from a batch publish operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully queued messages.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}
