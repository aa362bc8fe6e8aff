//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use rumqttc::{Event, EventLoop, Outgoing};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use gpusight_common::{TopicBuilder, connect, init_tracing};

use crate::BridgeArgs;
use crate::availability::AvailabilityPublisher;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::events::BusEvent;
use crate::publisher::{MessageSink, Publisher};

/// Capacity of the bus event channel handed to the bridge.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default time allowed for the offline message to reach the broker.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of an MQTT bridge.
///
/// Handles:
/// - Logging initialization
/// - MQTT connection with the offline last will registered
/// - Pumping the MQTT event loop and surfacing [`BusEvent`]s
/// - Task spawning and management
/// - Orderly shutdown: offline availability, DISCONNECT, event loop drain
///
/// # Example
///
/// ```ignore
/// use gpusight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, shutdown_signal};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse();
///     let config = MyBridgeConfig::from_args(&args, "mybridge.json5")?;
///     BridgeRunner::init_logging(&config, Some(&args))?;
///
///     let mut runner = BridgeRunner::connect("mybridge", &config).await?;
///     let publisher = runner.publisher();
///     runner.spawn(async move {
///         // Worker logic here
///     });
///
///     shutdown_signal().await;
///     runner.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner {
    /// Bridge name for logging.
    name: String,
    /// Publisher for outbound messages.
    publisher: Publisher,
    /// Availability flag publisher.
    availability: AvailabilityPublisher,
    /// Bus events, until taken by the bridge.
    events: Option<mpsc::Receiver<BusEvent>>,
    /// Event loop pump.
    pump: JoinHandle<()>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
    /// Time allowed for the final flush.
    shutdown_grace: Duration,
}

impl BridgeRunner {
    /// Initialize logging from the configuration, with the CLI override.
    ///
    /// Separate from [`connect`](Self::connect) so bridges can log work that
    /// must happen before a broker connection exists.
    pub fn init_logging<C: BridgeConfig>(config: &C, args: Option<&BridgeArgs>) -> Result<()> {
        init_tracing(&config.effective_logging(args)).map_err(|e| BridgeError::config(e.to_string()))
    }

    /// Connect to the broker and start pumping its event loop.
    ///
    /// The offline availability message is registered as the last will, so
    /// an unclean exit is visible to subscribers. Fails with
    /// [`BridgeError::MqttConnection`] if the broker cannot be reached.
    pub async fn connect<C: BridgeConfig>(name: impl Into<String>, config: &C) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION");
        let topics = config.topics();
        let availability = AvailabilityPublisher::new(&topics);

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let session = connect(config.mqtt(), Some(availability.last_will()))
            .await
            .map_err(|e| BridgeError::MqttConnection(e.to_string()))?;
        if session.session_present {
            tracing::info!(bridge = %name, "Broker resumed a previous session");
        }

        let publisher = Publisher::new(session.client, topics.clone());

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reconnect_delay = Duration::from_secs(config.mqtt().reconnect_delay_secs.max(1));
        let pump = tokio::spawn(pump_events(session.eventloop, topics, tx, reconnect_delay));

        Ok(Self {
            name,
            publisher,
            availability,
            events: Some(rx),
            pump,
            tasks: Vec::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Set how long shutdown waits for queued messages to be flushed.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Topics used by this bridge.
    pub fn topics(&self) -> &TopicBuilder {
        self.publisher.topics()
    }

    /// Take the bus event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<BusEvent>> {
        self.events.take()
    }

    /// Spawn a worker task.
    ///
    /// The task will be tracked and aborted on shutdown.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Shut the bridge down.
    ///
    /// This will:
    /// 1. Abort all spawned tasks
    /// 2. Publish retained `offline` availability and request DISCONNECT
    /// 3. Wait for the event loop to flush both and finish
    ///
    /// Steps 2 and 3 share one shutdown grace deadline; when it passes, the
    /// event loop is aborted and the broker falls back to the last will.
    pub async fn shutdown(self) -> Result<()> {
        for task in &self.tasks {
            task.abort();
        }

        let deadline = Instant::now() + self.shutdown_grace;
        let offline = sign_off(&self.publisher, &self.availability, self.shutdown_grace).await;

        let mut pump = self.pump;
        match tokio::time::timeout_at(deadline, &mut pump).await {
            Ok(_) => tracing::debug!("MQTT event loop finished"),
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.shutdown_grace.as_secs_f64(),
                    "MQTT event loop did not drain in time"
                );
                pump.abort();
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        offline
    }
}

/// Publish retained `offline` and request DISCONNECT, giving up after `grace`.
///
/// Both requests wait for room in the client's queue, which never drains
/// while the broker is unreachable. Fails with
/// [`BridgeError::ShutdownTimeout`] in that case.
pub async fn sign_off<S: MessageSink>(
    sink: &S,
    availability: &AvailabilityPublisher,
    grace: Duration,
) -> Result<()> {
    let farewell = async {
        let offline = availability.publish_offline(sink).await;
        if let Err(ref e) = offline {
            tracing::warn!(error = %e, "Failed to publish offline availability");
        }
        if let Err(e) = sink.disconnect().await {
            tracing::warn!(error = %e, "Failed to request MQTT disconnect");
        }
        offline
    };

    match tokio::time::timeout(grace, farewell).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs_f64(),
                "MQTT request queue did not accept offline availability in time"
            );
            Err(BridgeError::ShutdownTimeout(grace))
        }
    }
}

/// Drive the MQTT event loop until the client disconnects.
///
/// Connection errors are reported as [`BusEvent::Disconnected`]; polling
/// again after `reconnect_delay` makes the client reconnect. Events are
/// forwarded with `try_send` so a slow consumer never stalls the loop.
async fn pump_events(
    mut eventloop: EventLoop,
    topics: TopicBuilder,
    tx: mpsc::Sender<BusEvent>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("DISCONNECT sent");
                break;
            }
            Ok(event) => {
                if let Some(bus_event) = BusEvent::from_event(&event, &topics) {
                    forward(&tx, bus_event);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection lost; reconnecting");
                forward(&tx, BusEvent::from_error(&e));
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

fn forward(tx: &mpsc::Sender<BusEvent>, event: BusEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(kind = event.kind(), "Bus event channel full; dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::OutboundMessage;
    use crate::testing::RecordingSink;

    #[tokio::test]
    async fn test_forward_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        forward(&tx, BusEvent::Connected { session_present: false });
        forward(&tx, BusEvent::Disconnected { reason: "x".to_string() });

        assert_eq!(rx.recv().await, Some(BusEvent::Connected { session_present: false }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_ignores_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        forward(&tx, BusEvent::PlatformReset { payload: "online".to_string() });
    }

    #[tokio::test]
    async fn test_sign_off_publishes_offline_then_disconnects() {
        let sink = RecordingSink::new();
        let availability = AvailabilityPublisher::new(&TopicBuilder::default());

        sign_off(&sink, &availability, Duration::from_secs(1)).await.unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "nvidia-smi/availability");
        assert_eq!(messages[0].payload_str(), "offline");
        assert!(messages[0].retain);
        assert!(sink.is_disconnected());
    }

    #[tokio::test]
    async fn test_sign_off_gives_up_on_stalled_queue() {
        let sink = RecordingSink::new();
        sink.stall();
        let availability = AvailabilityPublisher::new(&TopicBuilder::default());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            sign_off(&sink, &availability, Duration::from_millis(50)),
        )
        .await
        .expect("sign-off must respect its grace period");

        assert!(matches!(result, Err(BridgeError::ShutdownTimeout(_))));
        assert!(sink.messages().is_empty());
        assert!(!sink.is_disconnected());
    }

    #[tokio::test]
    async fn test_shutdown_bounded_with_unreachable_broker() {
        // Nothing listens on port 1, so the event loop never drains the queue.
        let options = rumqttc::MqttOptions::new("stuck", "127.0.0.1", 1);
        let (client, eventloop) = rumqttc::AsyncClient::new(options, 4);
        let topics = TopicBuilder::default();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pump = tokio::spawn(pump_events(
            eventloop,
            topics.clone(),
            tx,
            Duration::from_millis(100),
        ));

        let publisher = Publisher::new(client, topics.clone());
        let mut queued = 0;
        while publisher
            .try_send(OutboundMessage::transient("nvidia-smi/gpu-aaa", "{}"))
            .is_ok()
        {
            queued += 1;
            assert!(queued <= 4, "request queue drained without a broker");
        }

        let runner = BridgeRunner {
            name: "stuck".to_string(),
            publisher,
            availability: AvailabilityPublisher::new(&topics),
            events: Some(rx),
            pump,
            tasks: Vec::new(),
            shutdown_grace: Duration::from_secs(1),
        };

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(10), runner.shutdown())
            .await
            .expect("shutdown must finish within its grace period");

        assert!(matches!(result, Err(BridgeError::ShutdownTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
