//! Bus events surfaced to bridges.
//!
//! The MQTT event loop produces a stream of protocol-level events. Bridges
//! only care about a handful of them, so the pump converts raw events into
//! the closed [`BusEvent`] set and drops acknowledgements, pings and the
//! like.

use rumqttc::{ConnectionError, Event, Packet};

use gpusight_common::TopicBuilder;

/// Events a bridge reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The client (re)connected to the broker.
    Connected { session_present: bool },

    /// The connection dropped; the pump will reconnect.
    Disconnected { reason: String },

    /// The home-automation platform announced a restart on its status topic.
    PlatformReset { payload: String },

    /// Any other inbound publish.
    Message { topic: String, payload: Vec<u8> },
}

impl BusEvent {
    /// Convert a raw client event, or `None` when it is protocol chatter.
    pub fn from_event(event: &Event, topics: &TopicBuilder) -> Option<Self> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => Some(BusEvent::Connected {
                session_present: ack.session_present,
            }),
            Event::Incoming(Packet::Publish(publish)) => {
                if topics.is_platform_status(&publish.topic) {
                    Some(BusEvent::PlatformReset {
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    })
                } else {
                    Some(BusEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    })
                }
            }
            Event::Incoming(Packet::Disconnect) => Some(BusEvent::Disconnected {
                reason: "broker sent DISCONNECT".to_string(),
            }),
            _ => None,
        }
    }

    /// Event for a connection error reported by the event loop.
    pub fn from_error(error: &ConnectionError) -> Self {
        BusEvent::Disconnected {
            reason: error.to_string(),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            BusEvent::Connected { .. } => "connected",
            BusEvent::Disconnected { .. } => "disconnected",
            BusEvent::PlatformReset { .. } => "platform_reset",
            BusEvent::Message { .. } => "message",
        }
    }
}
