//! Error types for myhero-ernst.

use thiserror::Error;

/// Errors that stop the relay, either at startup or when the broker client
/// can no longer be driven.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (signals, terminal, output sink).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Service configuration could not be loaded.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Required connection settings absent after flags, environment and prompt.
    #[error("Missing required settings: {}", .0.join(", "))]
    MissingSettings(Vec<&'static str>),

    /// Only one of broker host/port was supplied.
    #[error("Broker address is incomplete: {supplied} was given without {missing}")]
    PartialBroker {
        /// The half of the pair that was supplied.
        supplied: &'static str,
        /// The half of the pair that is absent.
        missing: &'static str,
    },

    /// Broker location could not be discovered.
    #[error("Message queue not found: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The MQTT client request channel is closed.
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Logging or metrics export could not be set up.
    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Service discovery failures (SRV then A lookup).
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The resolver failed for a reason other than an empty answer.
    #[error("{record} lookup for {name} failed: {reason}")]
    LookupFailed {
        /// DNS record type queried.
        record: &'static str,
        /// Name that was queried.
        name: String,
        /// Resolver error message.
        reason: String,
    },

    /// The SRV answer did not contain exactly one record.
    #[error("cannot uniquely resolve service location for {name}: {count} SRV records")]
    NotUnique {
        /// Name that was queried.
        name: String,
        /// Number of records returned.
        count: usize,
    },

    /// The SRV target has no A record.
    #[error("no A record for {0}")]
    NoAddress(String),
}

/// Failures while submitting a single vote. Never fatal to the relay.
#[derive(Debug, Error)]
pub enum VoteError {
    /// Transport failure or unreadable body.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Data service answered with a non-success status.
    #[error("data service returned status {0}")]
    Status(reqwest::StatusCode),

    /// Response body was not the expected JSON.
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Vote URL could not be built from the data server address.
    #[error("cannot build vote URL from {0}")]
    Url(String),
}
