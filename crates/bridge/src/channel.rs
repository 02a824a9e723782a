//! Cloud property channel over MQTT.
//!
//! Each property lives on `<base_topic>/<device_id>/<property>`. The message
//! property `ping` is written by users on `.../ping/set` and answered on
//! `.../ping`, so the bridge never reads back its own replies.
//!
//! The rumqttc event loop is pumped in `pump`, which turns packets into
//! `ChannelEvent`s for the dispatcher. Reconnects are left to rumqttc.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Packet, QoS,
};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Credentials, MqttConfig};

/// Name of the shared request/reply property.
pub(crate) const MESSAGE_PROPERTY: &str = "ping";

const SET_SUFFIX: &str = "set";

/// Pause after a transport error before polling again.
const RETRY_DELAY_SEC: u64 = 2;

/// Capacity of the rumqttc request queue. It only drains while `pump` polls.
const REQUEST_QUEUE: usize = 20;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelEvent {
    Connected,
    Disconnected,
    /// Raw value written to the message property.
    Request(String),
    /// Transport error; the adapter keeps retrying.
    Error(String),
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Topics {
    prefix: String,
}

impl Topics {
    pub(crate) fn new(base_topic: &str, device_id: &str) -> Self {
        Self {
            prefix: format!("{}/{device_id}", base_topic.trim()),
        }
    }

    /// "<base>/<device>/<property>"
    pub(crate) fn property(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }

    /// "<base>/<device>/ping/set"
    pub(crate) fn request(&self) -> String {
        format!("{}/{MESSAGE_PROPERTY}/{SET_SUFFIX}", self.prefix)
    }

    pub(crate) fn is_request(&self, topic: &str) -> bool {
        topic == self.request()
    }
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Write side of the cloud property channel.
#[async_trait]
pub(crate) trait PropertyChannel: Send + Sync {
    async fn publish(&self, property: &str, payload: Vec<u8>) -> Result<()>;
}

pub(crate) struct MqttChannel {
    client: AsyncClient,
    topics: Topics,
}

#[async_trait]
impl PropertyChannel for MqttChannel {
    async fn publish(&self, property: &str, payload: Vec<u8>) -> Result<()> {
        let topic = self.topics.property(property);
        // State properties are retained so the firmware gets them on (re)connect;
        // replies are one-shot.
        let retain = property != MESSAGE_PROPERTY;
        debug!(%topic, bytes = payload.len(), retain, "publish");
        self.client
            .publish(&topic, QoS::AtLeastOnce, retain, payload)
            .await
            .with_context(|| format!("publish to {topic} failed"))
    }
}

/// Build the MQTT session. Nothing touches the network until the returned
/// event loop is polled.
pub(crate) fn connect(
    cfg: &MqttConfig,
    creds: &Credentials,
    topics: Topics,
) -> (MqttChannel, AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(creds.device_id.clone(), cfg.host.clone(), cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
    options.set_credentials(creds.device_id.clone(), creds.secret_key.clone());

    let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE);
    let channel = MqttChannel {
        client: client.clone(),
        topics,
    };
    (channel, client, eventloop)
}

// ---------------------------------------------------------------------------
// Event pump
// ---------------------------------------------------------------------------

/// Map one rumqttc event to a channel event. A refused connection is fatal.
pub(crate) fn classify(event: &Event, topics: &Topics) -> Result<Option<ChannelEvent>> {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            if ack.code != ConnectReturnCode::Success {
                bail!("broker refused connection: {:?}", ack.code);
            }
            Ok(Some(ChannelEvent::Connected))
        }
        Event::Incoming(Packet::Publish(p)) if topics.is_request(&p.topic) => Ok(Some(
            ChannelEvent::Request(String::from_utf8_lossy(&p.payload).into_owned()),
        )),
        Event::Incoming(Packet::Publish(p)) => {
            warn!(topic = %p.topic, "unhandled topic");
            Ok(None)
        }
        Event::Incoming(Packet::Disconnect) => Ok(Some(ChannelEvent::Disconnected)),
        _ => Ok(None),
    }
}

/// Drive the MQTT event loop until the broker refuses us, the first
/// connection attempt fails, or the dispatcher goes away.
pub(crate) async fn pump(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Topics,
    tx: mpsc::Sender<ChannelEvent>,
) -> Result<()> {
    let mut connected_once = false;

    loop {
        let event = match eventloop.poll().await {
            Ok(notification) => {
                let Some(event) = classify(&notification, &topics)? else {
                    continue;
                };
                if event == ChannelEvent::Connected {
                    connected_once = true;
                    // Clean session: subscribe on every connect.
                    subscribe_requests(&client, &topics)?;
                    info!(topic = %topics.request(), "channel connected, subscribed");
                }
                event
            }
            Err(ConnectionError::ConnectionRefused(code)) => {
                bail!("broker refused connection: {code:?}");
            }
            Err(e) if !connected_once => {
                return Err(e).context("could not connect to cloud channel");
            }
            Err(e) => {
                error!("channel error: {e}. reconnecting...");
                if tx.send(ChannelEvent::Error(e.to_string())).await.is_err() {
                    return Ok(());
                }
                sleep(Duration::from_secs(RETRY_DELAY_SEC)).await;
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            info!("dispatcher stopped, closing channel pump");
            return Ok(());
        }
    }
}

/// Queue the request subscription without blocking the poll loop. When the
/// queue is full of publications made while offline, the subscribe waits on
/// its own task until `pump` has drained some of them.
fn subscribe_requests(client: &AsyncClient, topics: &Topics) -> Result<()> {
    match client.try_subscribe(topics.request(), QoS::AtLeastOnce) {
        Ok(()) => Ok(()),
        Err(ClientError::TryRequest(_)) => {
            warn!("request queue full, subscribing once it drains");
            let client = client.clone();
            let topic = topics.request();
            tokio::spawn(async move {
                if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                    error!(%topic, "deferred subscribe failed: {e}");
                }
            });
            Ok(())
        }
        Err(e) => Err(e).context("failed to subscribe to request topic"),
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
