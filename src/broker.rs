//! Broker connection: MQTT event loop and the seams the relay drives.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::discovery::ResolvedEndpoint;
use crate::error::RelayError;

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 16;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload: the hero identifier.
    pub payload: Vec<u8>,
}

impl VoteMessage {
    /// Create a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text. Invalid UTF-8 is replaced, nothing is trimmed.
    pub fn hero(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Connection lifecycle and delivery events, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Connection acknowledged (first connect or reconnect).
    Connected {
        /// Broker return code.
        code: String,
    },
    /// Message received on a subscribed topic.
    Message(VoteMessage),
    /// Established connection lost; the client keeps reconnecting.
    Disconnected {
        /// Why the connection dropped.
        reason: String,
    },
}

/// Produces broker events one at a time.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next event. `None` once the source is closed for good.
    async fn next_event(&mut self) -> Option<BrokerEvent>;
}

/// Issues subscribe requests on the current connection.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<(), RelayError>;
}

#[async_trait]
impl Subscriber for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        AsyncClient::subscribe(self, topic, QoS::AtMostOnce).await?;
        Ok(())
    }
}

/// MQTT connection driven by rumqttc.
///
/// Polling the event loop after a connection error makes rumqttc reconnect,
/// so the source never ends on its own. Sessions are clean: subscriptions do
/// not survive a reconnect.
pub struct MqttBroker {
    client: AsyncClient,
    eventloop: EventLoop,
    reconnect_delay: Duration,
    connected: bool,
}

impl MqttBroker {
    /// Configure a client for `endpoint`. Nothing is sent until the first poll.
    pub fn new(endpoint: &ResolvedEndpoint, relay: &RelayConfig) -> Self {
        let mut options = MqttOptions::new(relay.client_id(), endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(relay.keep_alive());
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Self {
            client,
            eventloop,
            reconnect_delay: relay.reconnect_delay(),
            connected: false,
        }
    }

    /// Handle for subscribe requests on this connection.
    pub fn subscriber(&self) -> AsyncClient {
        self.client.clone()
    }
}

#[async_trait]
impl EventSource for MqttBroker {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.connected = true;
                    return Some(BrokerEvent::Connected {
                        code: format!("{:?}", ack.code),
                    });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(BrokerEvent::Message(VoteMessage::new(
                        publish.topic,
                        publish.payload.to_vec(),
                    )));
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, codes = ?ack.return_codes, "Subscription acknowledged");
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => {
                    debug!("All client handles dropped, closing event loop");
                    return None;
                }
                Err(e) => {
                    if std::mem::replace(&mut self.connected, false) {
                        return Some(BrokerEvent::Disconnected {
                            reason: e.to_string(),
                        });
                    }
                    warn!(error = %e, "Broker connection attempt failed");
                    sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}
