//! MyHero Ernst - vote processing relay for the MyHero voting application.
//!
//! Votes arrive on the `MyHero-Votes` MQTT topic, published by the API
//! service. Each message payload is a hero identifier; the relay records it
//! with one authenticated `POST /vote/{hero}` against the data service and
//! prints whether the vote was accepted.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         myhero-ernst                           │
//! │                                                                │
//! │  ┌──────────────┐   SRV + A    ┌──────────────┐                │
//! │  │ Connection   │─────────────▶│ DNS (system  │                │
//! │  │ settings     │  (no host/   │  resolvers)  │                │
//! │  └──────┬───────┘   port set)  └──────────────┘                │
//! │         │ ConnectionConfig                                     │
//! │         ▼                                                      │
//! │  ┌──────────────┐  Message   ┌──────────────┐  POST /vote/x    │
//! │  │ MQTT broker  │───────────▶│  RelayLoop   │─────────────────▶│ data service
//! │  │ (rumqttc)    │◀───────────│              │  key: <key>      │
//! │  └──────────────┘ subscribe  └──────────────┘                  │
//! │                  on connect         │ "Placing Vote for x - …" │
//! │                                     ▼ stdout                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use myhero_ernst::{ConnectionOverrides, ConnectionSettings, RelayConfig, RelayLoop, SystemLookup};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ConnectionSettings::resolve(
//!         &ConnectionOverrides::default(),
//!         &ConnectionOverrides::from_env()?,
//!         None,
//!     )?;
//!     let connection = settings.establish(&SystemLookup::from_system_conf()?).await?;
//!
//!     let relay_config = RelayConfig::default();
//!     let relay = RelayLoop::from_config(connection, &relay_config)?;
//!     let mut broker = relay.broker(&relay_config);
//!     let subscriber = broker.subscriber();
//!
//!     relay.run(&mut broker, &subscriber, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod broker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod forwarder;
pub mod metrics;
pub mod relay;
pub mod telemetry;

// Re-export main types
pub use crate::broker::{BrokerEvent, EventSource, MqttBroker, Subscriber, VoteMessage};
pub use crate::config::{
    BrokerSource, Config, ConnectionConfig, ConnectionOverrides, ConnectionSettings, Prompter,
    RelayConfig, TelemetryConfig, TerminalPrompter,
};
pub use crate::discovery::{ResolvedEndpoint, ServiceLookup, SrvTarget, SystemLookup};
pub use crate::error::{DiscoveryError, RelayError, VoteError};
pub use crate::forwarder::{HttpVoteForwarder, VoteForwarder, VoteResult};
pub use crate::relay::{MessageHandler, RelayLoop, RelayState, VOTE_TOPIC};
