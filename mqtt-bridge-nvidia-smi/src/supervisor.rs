//! Ties the sampler, parser, router and discovery together.
//!
//! Two loops run concurrently once the broker connection is up:
//!
//! - [`Supervisor::run_events`] handles [`BusEvent`]s from the MQTT pump
//!   (re-subscribing after reconnects, republishing discovery when the
//!   platform restarts).
//! - [`Supervisor::run_stream`] reads sampler lines, parses them and routes
//!   samples to state topics until shutdown or end of stream.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use gpusight_bridge_framework::{BusEvent, MessageSink, TopicBuilder};

use crate::config::NvidiaConfig;
use crate::discovery::DiscoveryPublisher;
use crate::monitor::DmonMonitor;
use crate::parser::{ParseEvent, StreamError, StreamParser};
use crate::registry::DeviceRegistry;
use crate::router::{PublishRouter, RouteOutcome};

/// Why the stream loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The shutdown future resolved.
    Interrupted,
    /// The sampler closed its output.
    EndOfStream,
}

/// Counters for one streaming session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub samples: u64,
    pub published: u64,
    pub unknown_device: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub resyncs: u64,
}

/// Result of a streaming session that ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub end: StreamEnd,
    pub stats: StreamStats,
}

/// Bridge supervisor. Shared between the event and stream loops.
#[derive(Debug)]
pub struct Supervisor {
    registry: Arc<DeviceRegistry>,
    discovery: DiscoveryPublisher,
    router: PublishRouter,
    status_topic: String,
}

impl Supervisor {
    pub fn new(registry: Arc<DeviceRegistry>, topics: TopicBuilder, config: &NvidiaConfig) -> Self {
        Self {
            discovery: DiscoveryPublisher::new(topics.clone(), config),
            router: PublishRouter::new(Arc::clone(&registry), topics.clone()),
            status_topic: topics.platform_status(),
            registry,
        }
    }

    /// Work done once after the first connection: subscribe to the platform
    /// status topic and announce every sensor.
    pub async fn on_first_connect<S: MessageSink>(&self, sink: &S) {
        self.subscribe_status(sink).await;
        self.publish_discovery(sink).await;
    }

    /// React to one bus event.
    pub async fn handle_event<S: MessageSink>(&self, event: BusEvent, sink: &S) {
        match event {
            BusEvent::Connected { session_present } => {
                tracing::info!(session_present, "Reconnected to MQTT broker");
                self.subscribe_status(sink).await;
            }
            BusEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Disconnected from MQTT broker");
            }
            BusEvent::PlatformReset { payload } => {
                tracing::info!(status = %payload, "Home Assistant status changed; republishing discovery");
                self.publish_discovery(sink).await;
            }
            BusEvent::Message { topic, payload } => {
                tracing::debug!(topic = %topic, bytes = payload.len(), "Ignoring message");
            }
        }
    }

    /// Handle bus events until the channel closes.
    pub async fn run_events<S: MessageSink>(
        self: Arc<Self>,
        mut events: mpsc::Receiver<BusEvent>,
        sink: S,
    ) {
        while let Some(event) = events.recv().await {
            tracing::trace!(kind = event.kind(), "Bus event");
            self.handle_event(event, &sink).await;
        }
        tracing::debug!("Bus event channel closed");
    }

    /// Parse and route sampler output until `shutdown` resolves or the
    /// sampler's output ends.
    ///
    /// A unit row that does not match its header ends the session with
    /// [`StreamError::SchemaMismatch`]. Everything else is logged and
    /// skipped.
    pub async fn run_stream<S, F>(
        &self,
        monitor: &mut DmonMonitor,
        sink: &S,
        shutdown: F,
    ) -> Result<StreamSummary, StreamError>
    where
        S: MessageSink,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut parser = StreamParser::new();
        let mut stats = StreamStats::default();

        let end = loop {
            let line = tokio::select! {
                _ = &mut shutdown => break StreamEnd::Interrupted,
                line = monitor.next_line() => line,
            };
            let Some(line) = line else {
                break StreamEnd::EndOfStream;
            };

            match parser.feed(&line) {
                Ok(ParseEvent::Sample(sample)) => {
                    stats.samples += 1;
                    match self.router.route(&sample, sink) {
                        RouteOutcome::Published { .. } => stats.published += 1,
                        RouteOutcome::UnknownDevice(_) => stats.unknown_device += 1,
                        RouteOutcome::Dropped => stats.dropped += 1,
                    }
                }
                Ok(ParseEvent::Skipped(skip)) => {
                    stats.skipped += 1;
                    tracing::debug!(reason = %skip, line = %line, "Skipped sampler row");
                }
                Ok(ParseEvent::Header { columns }) => {
                    tracing::debug!(columns, "Read sampler header");
                }
                Ok(ParseEvent::Resync { columns }) => {
                    stats.resyncs += 1;
                    tracing::debug!(columns, "Sampler header repeated; starting new frame");
                }
                Ok(ParseEvent::Units) => {
                    if let Some(frame) = parser.frame() {
                        tracing::debug!(
                            columns = ?frame.columns(),
                            units = ?frame.units(),
                            "Sampler schema"
                        );
                    }
                }
                Ok(ParseEvent::Empty) => {}
                Err(e) => {
                    tracing::error!(error = %e, line = %line, "Sampler schema mismatch");
                    return Err(e);
                }
            }
        };

        tracing::info!(
            reason = ?end,
            samples = stats.samples,
            published = stats.published,
            skipped = stats.skipped,
            dropped = stats.dropped,
            "Stream ended"
        );

        Ok(StreamSummary { end, stats })
    }

    async fn subscribe_status<S: MessageSink>(&self, sink: &S) {
        match sink.subscribe(&self.status_topic).await {
            Ok(()) => tracing::debug!(topic = %self.status_topic, "Subscribed to platform status"),
            Err(e) => {
                tracing::warn!(topic = %self.status_topic, error = %e, "Failed to subscribe")
            }
        }
    }

    async fn publish_discovery<S: MessageSink>(&self, sink: &S) {
        if let Err(e) = self.discovery.publish(sink, &self.registry).await {
            tracing::error!(error = %e, "Failed to build discovery configs");
        }
    }
}
