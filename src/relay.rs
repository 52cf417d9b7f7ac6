//! Vote relay: broker events in, one data service call per message out.
//!
//! ```text
//!                 Connected / subscribe MyHero-Votes
//!   Disconnected ─────────────────────────────────────▶ Subscribed ◀─┐
//!        ▲                                                  │        │ Message / record vote,
//!        └──────────────────── Disconnected ────────────────┘        │ print result line
//!                                                           └────────┘
//! ```
//!
//! Events are handled strictly one after another: the next event is not read
//! until the current handler has returned, so a slow data service throttles
//! the relay instead of piling up concurrent calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerEvent, EventSource, MqttBroker, Subscriber, VoteMessage};
use crate::config::{ConnectionConfig, RelayConfig};
use crate::error::RelayError;
use crate::forwarder::{HttpVoteForwarder, VoteForwarder, VoteResult};
use crate::metrics::{self, Timer};

/// Topic votes are published on.
pub const VOTE_TOPIC: &str = "MyHero-Votes";

/// Connection state as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No acknowledged connection.
    Disconnected,
    /// Connected and subscribed to [`VOTE_TOPIC`].
    Subscribed,
}

/// Reacts to broker events.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called on every connection acknowledgment, including reconnects.
    async fn on_connect(&self, subscriber: &dyn Subscriber) -> Result<(), RelayError>;

    /// Called once per delivered message.
    async fn on_message(&self, message: &VoteMessage);
}

/// Drive `handler` with events from `events` until the source closes or
/// `shutdown` is cancelled.
///
/// Only the wait for the next event is interruptible; a handler that has
/// started runs to completion.
pub async fn drive<H, E, S>(
    handler: &H,
    events: &mut E,
    subscriber: &S,
    shutdown: &CancellationToken,
) -> Result<(), RelayError>
where
    H: MessageHandler + ?Sized,
    E: EventSource + ?Sized,
    S: Subscriber,
{
    let mut state = RelayState::Disconnected;

    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Relay received shutdown signal");
                return Ok(());
            }

            event = events.next_event() => event,
        };

        match event {
            Some(BrokerEvent::Connected { code }) => {
                info!(code = %code, "Connected to broker");
                metrics::record_broker_connect();
                handler.on_connect(subscriber).await?;
                state = RelayState::Subscribed;
            }
            Some(BrokerEvent::Message(message)) => {
                if state != RelayState::Subscribed {
                    debug!(topic = %message.topic, "Message delivered before subscription");
                }
                handler.on_message(&message).await;
            }
            Some(BrokerEvent::Disconnected { reason }) => {
                warn!(reason = %reason, "Broker connection lost, reconnecting");
                metrics::record_broker_disconnect();
                state = RelayState::Disconnected;
            }
            None => {
                info!(state = ?state, "Broker event stream ended");
                return Ok(());
            }
        }
    }
}

/// The relay: owns its connection parameters, the forwarder, and the sink
/// result lines are written to.
pub struct RelayLoop<F> {
    config: ConnectionConfig,
    forwarder: F,
    output: Mutex<Box<dyn Write + Send>>,
}

impl RelayLoop<HttpVoteForwarder> {
    /// Build a relay that posts votes to the configured data service.
    pub fn from_config(config: ConnectionConfig, relay: &RelayConfig) -> Result<Self, RelayError> {
        let forwarder = HttpVoteForwarder::new(
            config.data_server_url.clone(),
            config.data_server_key.clone(),
            relay.http_timeout(),
        )?;
        Ok(Self::new(config, forwarder))
    }
}

impl<F: VoteForwarder> RelayLoop<F> {
    /// Create a relay writing result lines to stdout.
    pub fn new(config: ConnectionConfig, forwarder: F) -> Self {
        Self {
            config,
            forwarder,
            output: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Write result lines to `output` instead of stdout.
    pub fn with_output(self, output: impl Write + Send + 'static) -> Self {
        Self {
            output: Mutex::new(Box::new(output)),
            ..self
        }
    }

    /// Connection parameters.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// MQTT connection to the configured broker.
    pub fn broker(&self, relay: &RelayConfig) -> MqttBroker {
        MqttBroker::new(&self.config.broker, relay)
    }

    /// Record one vote and emit its result line.
    pub async fn process(&self, hero: &str) -> VoteResult {
        let timer = Timer::start();
        let result = self.forwarder.record_vote(hero).await;
        metrics::record_vote(result, timer.elapsed());

        info!(hero, result = %result, "Processed vote");
        self.emit(&format!("Placing Vote for {hero} - {result}"));

        result
    }

    fn emit(&self, line: &str) {
        let mut output = self.output.lock();
        if let Err(e) = writeln!(output, "{line}").and_then(|()| output.flush()) {
            warn!(error = %e, "Failed to write vote result");
        }
    }

    /// Run against `events` until the source closes or `shutdown` fires.
    pub async fn run<E, S>(
        &self,
        events: &mut E,
        subscriber: &S,
        shutdown: &CancellationToken,
    ) -> Result<(), RelayError>
    where
        E: EventSource + ?Sized,
        S: Subscriber,
    {
        info!(
            broker = %self.config.broker,
            data_server = %self.config.data_server_url,
            topic = VOTE_TOPIC,
            "Starting vote relay"
        );
        drive(self, events, subscriber, shutdown).await
    }
}

#[async_trait]
impl<F: VoteForwarder> MessageHandler for RelayLoop<F> {
    async fn on_connect(&self, subscriber: &dyn Subscriber) -> Result<(), RelayError> {
        subscriber.subscribe(VOTE_TOPIC).await?;
        metrics::record_subscribe();
        info!(topic = VOTE_TOPIC, "Subscribed to vote topic");
        Ok(())
    }

    async fn on_message(&self, message: &VoteMessage) {
        if message.topic != VOTE_TOPIC {
            warn!(topic = %message.topic, "Ignoring message on unexpected topic");
            return;
        }

        let hero = message.hero();
        self.process(&hero).await;
    }
}
