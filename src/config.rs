//! Configuration types for myhero-ernst.
//!
//! Two independent layers:
//!
//! - [`Config`]: service tuning (keep-alive, timeouts, telemetry) loaded from
//!   an optional TOML file and `MYHERO_ERNST__*` environment variables.
//! - [`ConnectionSettings`]: where the data service and broker live, resolved
//!   per field as command flag, then `myhero_*` environment variable, then
//!   (opt-in) interactive prompt.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::discovery::{resolve_endpoint, ResolvedEndpoint, ServiceLookup};
use crate::error::RelayError;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Relay tuning.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load from `path` (absent file tolerated) overlaid with
    /// `MYHERO_ERNST__<SECTION>__<KEY>` environment variables.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let config = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("MYHERO_ERNST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;

        config.relay.validate()?;
        Ok(config)
    }
}

/// Broker client and vote call tuning.
///
/// The broker event loop is not polled while a vote call is in flight, so no
/// PINGREQ goes out during it. A vote call that outlives the keep-alive lets
/// the broker drop the relay mid-vote; [`RelayConfig::validate`] rejects
/// `http_timeout_secs >= keep_alive_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// MQTT client identifier. Defaults to `myhero-ernst-<pid>`.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Broker keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Pause between polls while the broker connection is down, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Timeout for one vote call in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl RelayConfig {
    /// MQTT client identifier.
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("myhero-ernst-{}", std::process::id()))
    }

    /// Broker keep-alive interval.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Reconnect pause.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Vote call timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Check that a vote call always finishes within one keep-alive period.
    /// A keep-alive of zero disables pings and is not constrained.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.keep_alive_secs > 0 && self.http_timeout_secs >= self.keep_alive_secs {
            return Err(RelayError::Config(format!(
                "relay.http_timeout_secs ({}) must be below relay.keep_alive_secs ({})",
                self.http_timeout_secs, self.keep_alive_secs
            )));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_http_timeout_secs() -> u64 {
    10
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "myhero_ernst=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "myhero-ernst".to_string()
}

/// Connection values supplied by one source (command flags or environment).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionOverrides {
    /// Data service base URL.
    #[serde(default)]
    pub data_server: Option<String>,
    /// Data service key.
    #[serde(default)]
    pub data_key: Option<String>,
    /// Broker FQDN for SRV discovery.
    #[serde(default)]
    pub mqtt_server: Option<String>,
    /// Broker host.
    #[serde(default)]
    pub mqtt_host: Option<String>,
    /// Broker port.
    #[serde(default)]
    pub mqtt_port: Option<u16>,
}

impl ConnectionOverrides {
    /// Read `myhero_data_server`, `myhero_data_key`, `myhero_mqtt_server`,
    /// `myhero_mqtt_host` and `myhero_mqtt_port` from the process environment.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_env_source(None)
    }

    /// Same as [`from_env`](Self::from_env) but reading `source` instead of
    /// the process environment when given.
    pub fn from_env_source(source: Option<HashMap<String, String>>) -> Result<Self, RelayError> {
        let overrides = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix("myhero")
                    .prefix_separator("_")
                    .source(source),
            )
            .build()?
            .try_deserialize()?;

        Ok(overrides)
    }

    /// Broker host/port pair from this source, if either half is present.
    fn broker_pair(&self) -> Result<Option<ResolvedEndpoint>, RelayError> {
        match (&self.mqtt_host, self.mqtt_port) {
            (Some(host), Some(port)) => Ok(Some(ResolvedEndpoint::new(host.clone(), port)?)),
            (Some(_), None) => Err(RelayError::PartialBroker {
                supplied: "mqtt host",
                missing: "mqtt port",
            }),
            (None, Some(_)) => Err(RelayError::PartialBroker {
                supplied: "mqtt port",
                missing: "mqtt host",
            }),
            (None, None) => Ok(None),
        }
    }
}

/// Last-resort source for a missing connection value.
pub trait Prompter {
    /// Ask `question` and return the answer.
    fn prompt(&self, question: &str) -> Result<String, RelayError>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&self, question: &str) -> Result<String, RelayError> {
        dialoguer::Input::<String>::new()
            .with_prompt(question)
            .interact_text()
            .map_err(|e| RelayError::Config(format!("interactive prompt failed: {e}")))
    }
}

const DATA_SERVER: &str = "data server (-d/--dataserver or myhero_data_server)";
const DATA_KEY: &str = "data key (-k/--datakey or myhero_data_key)";
const MQTT_SERVER: &str =
    "mqtt server (-q/--mqttserver or myhero_mqtt_server; or host and port via -i/-p)";

/// Where the broker is, before any DNS work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerSource {
    /// Host and port were supplied directly.
    Explicit(ResolvedEndpoint),
    /// Locate via SRV then A lookup of this FQDN.
    Discover {
        /// FQDN to query for SRV records.
        fqdn: String,
    },
}

/// Connection values after precedence resolution.
#[derive(Clone)]
pub struct ConnectionSettings {
    /// Data service base URL.
    pub data_server: Url,
    /// Data service key.
    pub data_key: String,
    /// Broker location.
    pub broker: BrokerSource,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("data_server", &self.data_server.as_str())
            .field("data_key", &"<redacted>")
            .field("broker", &self.broker)
            .finish()
    }
}

fn pick(
    flag: &Option<String>,
    env: &Option<String>,
    prompter: Option<&dyn Prompter>,
    question: &str,
) -> Result<Option<String>, RelayError> {
    if let Some(value) = flag.as_ref().or(env.as_ref()) {
        return Ok(Some(value.clone()));
    }
    match prompter {
        Some(prompter) => prompter.prompt(question).map(Some),
        None => Ok(None),
    }
}

impl ConnectionSettings {
    /// Resolve every connection value as flag, then environment, then prompt.
    ///
    /// Broker host and port are taken as a pair from the first source that
    /// supplies either; a half pair is an error. Only when neither source has
    /// them is the broker FQDN resolved (same precedence) for discovery.
    /// Without a prompter, all absent values are reported together.
    pub fn resolve(
        flags: &ConnectionOverrides,
        env: &ConnectionOverrides,
        prompter: Option<&dyn Prompter>,
    ) -> Result<Self, RelayError> {
        let mut missing = Vec::new();

        let data_server = pick(
            &flags.data_server,
            &env.data_server,
            prompter,
            "What is the data server address?",
        )?;
        if data_server.is_none() {
            missing.push(DATA_SERVER);
        }

        let data_key = pick(
            &flags.data_key,
            &env.data_key,
            prompter,
            "What is the data server authentication key?",
        )?;
        if data_key.is_none() {
            missing.push(DATA_KEY);
        }

        let explicit = match flags.broker_pair()? {
            Some(endpoint) => Some(endpoint),
            None => env.broker_pair()?,
        };
        let broker = match explicit {
            Some(endpoint) => Some(BrokerSource::Explicit(endpoint)),
            None => pick(
                &flags.mqtt_server,
                &env.mqtt_server,
                prompter,
                "What is the MQTT Server FQDN for an SRV Lookup?",
            )?
            .map(|fqdn| BrokerSource::Discover { fqdn }),
        };
        if broker.is_none() {
            missing.push(MQTT_SERVER);
        }

        let (Some(data_server), Some(data_key), Some(broker)) = (data_server, data_key, broker)
        else {
            return Err(RelayError::MissingSettings(missing));
        };

        let data_server = parse_data_server(&data_server)?;

        Ok(Self {
            data_server,
            data_key,
            broker,
        })
    }

    /// Produce the final connection parameters, running discovery if needed.
    pub async fn establish(
        self,
        lookup: &dyn ServiceLookup,
    ) -> Result<ConnectionConfig, RelayError> {
        let broker = match self.broker {
            BrokerSource::Explicit(endpoint) => endpoint,
            BrokerSource::Discover { fqdn } => {
                info!(mqtt_server = %fqdn, "Discovering broker via SRV lookup");
                resolve_endpoint(lookup, &fqdn).await?
            }
        };

        Ok(ConnectionConfig {
            data_server_url: self.data_server,
            data_server_key: self.data_key,
            broker,
        })
    }
}

/// Votes are appended as path segments, so the base must be a hierarchical
/// http(s) URL. `myhero-data:5000` parses, but with `myhero-data` as scheme.
fn parse_data_server(raw: &str) -> Result<Url, RelayError> {
    let url = Url::parse(raw)
        .map_err(|e| RelayError::Config(format!("invalid data server {raw:?}: {e}")))?;

    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::Config(format!(
            "invalid data server {raw:?}: expected an http:// or https:// address"
        )));
    }

    Ok(url)
}

/// Everything the relay needs to run. Immutable after startup.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Data service base URL.
    pub data_server_url: Url,
    /// Data service key.
    pub data_server_key: String,
    /// Broker address.
    pub broker: ResolvedEndpoint,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("data_server_url", &self.data_server_url.as_str())
            .field("data_server_key", &"<redacted>")
            .field("broker", &self.broker)
            .finish()
    }
}
