//! In-memory [`MessageSink`] for tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{BridgeError, Result};
use crate::publisher::{MessageSink, OutboundMessage};

/// Records every message it is given instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<OutboundMessage>>,
    subscriptions: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    capacity: Option<usize>,
    stalled: AtomicBool,
    disconnected: AtomicBool,
}

impl RecordingSink {
    /// Create an unbounded sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink whose `try_send` fails once `capacity` messages are held.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Make the sink behave like a client whose request queue never drains:
    /// `send` and `disconnect` wait forever and `try_send` fails.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Whether `disconnect` has completed.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Make every publish to `topic` fail.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic.into());
    }

    /// Snapshot of recorded messages, in send order.
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Recorded topics, in send order.
    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.topic).collect()
    }

    /// Topics subscribed to, in order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Remove and return all recorded messages.
    pub fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(|e| e.into_inner()))
    }

    async fn wait_if_stalled(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn record(&self, message: OutboundMessage, bounded: bool) -> Result<()> {
        if self.is_disconnected() {
            return Err(BridgeError::publish(message.topic, "client disconnected"));
        }
        if bounded && self.stalled.load(Ordering::SeqCst) {
            return Err(BridgeError::publish(message.topic, "request queue full"));
        }
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&message.topic)
        {
            return Err(BridgeError::publish(message.topic, "rejected by test sink"));
        }

        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        if bounded && self.capacity.is_some_and(|cap| messages.len() >= cap) {
            return Err(BridgeError::publish(message.topic, "request queue full"));
        }
        messages.push(message);
        Ok(())
    }
}

impl MessageSink for RecordingSink {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.wait_if_stalled().await;
        self.record(message, false)
    }

    fn try_send(&self, message: OutboundMessage) -> Result<()> {
        self.record(message, true)
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.wait_if_stalled().await;
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}
