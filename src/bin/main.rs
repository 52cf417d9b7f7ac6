//! myhero-ernst binary entry point.

use clap::Parser;
use myhero_ernst::{
    telemetry, Config, ConnectionOverrides, ConnectionSettings, Prompter, RelayLoop,
    SystemLookup, TerminalPrompter,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Vote processing service for the MyHero application.
#[derive(Parser, Debug)]
#[command(name = "myhero-ernst")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address of data server.
    #[arg(short = 'd', long = "dataserver")]
    data_server: Option<String>,

    /// Data server authentication key used in API calls.
    #[arg(short = 'k', long = "datakey")]
    data_key: Option<String>,

    /// MQTT server FQDN for SRV lookup.
    #[arg(short = 'q', long = "mqttserver")]
    mqtt_server: Option<String>,

    /// MQTT server host IP address.
    #[arg(short = 'i', long = "mqtthost")]
    mqtt_host: Option<String>,

    /// MQTT server port.
    #[arg(short = 'p', long = "mqttport")]
    mqtt_port: Option<u16>,

    /// Prompt for settings missing from flags and environment.
    #[arg(long)]
    interactive: bool,

    /// Path to service configuration file (TOML).
    #[arg(short, long, default_value = "myhero-ernst.toml")]
    config: PathBuf,
}

impl Args {
    fn overrides(&self) -> ConnectionOverrides {
        ConnectionOverrides {
            data_server: self.data_server.clone(),
            data_key: self.data_key.clone(),
            mqtt_server: self.mqtt_server.clone(),
            mqtt_host: self.mqtt_host.clone(),
            mqtt_port: self.mqtt_port,
        }
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    let _telemetry = telemetry::init(&config.telemetry)?;

    info!(config_file = %args.config.display(), "Starting myhero-ernst");

    let prompter = TerminalPrompter;
    let prompter: Option<&dyn Prompter> = args.interactive.then_some(&prompter as &dyn Prompter);
    let settings =
        ConnectionSettings::resolve(&args.overrides(), &ConnectionOverrides::from_env()?, prompter)?;

    let lookup = SystemLookup::from_system_conf()?;
    let connection = settings.establish(&lookup).await?;
    let relay = RelayLoop::from_config(connection, &config.relay)?;

    let resolved = relay.config();
    info!(
        data_server = %resolved.data_server_url,
        data_key_len = resolved.data_server_key.len(),
        mqtt_host = %resolved.broker.host,
        mqtt_port = resolved.broker.port,
        "Resolved connection settings"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let mut broker = relay.broker(&config.relay);
    let subscriber = broker.subscriber();
    let result = relay.run(&mut broker, &subscriber, &shutdown).await;

    if let Err(e) = result {
        error!("Relay error: {}", e);
        return Err(e.into());
    }

    info!("myhero-ernst shutdown complete");
    Ok(())
}
