use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS, Transport};

use crate::config::{MqttConfig, MqttProtocol};
use crate::error::{Error, Result};

/// An established MQTT connection.
///
/// The first CONNACK has already been consumed from `eventloop`; the caller
/// must keep polling it for the connection to make progress.
pub struct MqttSession {
    pub client: AsyncClient,
    pub eventloop: EventLoop,
    pub session_present: bool,
}

/// Build client options, registering `will` as the last-will message.
pub fn mqtt_options(config: &MqttConfig, will: Option<LastWill>) -> Result<MqttOptions> {
    if config.host.trim().is_empty() {
        return Err(Error::Config("MQTT host must not be empty".to_string()));
    }
    if config.keep_alive_secs < 5 {
        return Err(Error::Config(format!(
            "MQTT keep-alive must be at least 5s, got {}s",
            config.keep_alive_secs
        )));
    }

    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);

    if config.protocol == MqttProtocol::Mqtts {
        options.set_transport(Transport::tls_with_default_config());
    }

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    } else if config.password_without_username() {
        tracing::warn!("MQTT password is set without a username and will not be sent");
    }

    if let Some(will) = will {
        options.set_last_will(will);
    }

    Ok(options)
}

/// Connect to the broker and wait for a successful CONNACK.
///
/// A refused connection, a transport error, or no answer within
/// `connect_timeout_secs` is reported as [`Error::Connection`].
pub async fn connect(config: &MqttConfig, will: Option<LastWill>) -> Result<MqttSession> {
    let options = mqtt_options(config, will)?;
    let (client, mut eventloop) = AsyncClient::new(options, config.channel_capacity.max(1));

    tracing::info!(
        broker = %config.address(),
        protocol = %config.protocol,
        client_id = %config.client_id,
        authenticated = config.username.is_some(),
        "Connecting to MQTT broker"
    );

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let session_present = tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
        .await
        .map_err(|_| {
            Error::Connection(format!(
                "no CONNACK from {} within {}s",
                config.address(),
                config.connect_timeout_secs
            ))
        })??;

    tracing::info!(broker = %config.address(), session_present, "Connected to MQTT broker");

    Ok(MqttSession {
        client,
        eventloop,
        session_present,
    })
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<bool> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => return Ok(ack.session_present),
            event => tracing::trace!(?event, "Event before CONNACK"),
        }
    }
}

/// Last-will message publishing `payload` retained at QoS 1.
pub fn retained_will(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> LastWill {
    LastWill::new(topic, payload, QoS::AtLeastOnce, true)
}
