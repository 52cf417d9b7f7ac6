//! Logging and metrics export.
//!
//! Stdout belongs to the vote result lines, so every log line is written to
//! stderr. `RUST_LOG` takes precedence over `telemetry.log_level`.
//!
//! Optional exporters:
//! - Prometheus scrape endpoint for the `myhero_ernst.*` metrics (`prometheus` feature)
//! - OTLP span export (`otel` feature)

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "otel")]
use crate::config::OpenTelemetryConfig;
use crate::config::TelemetryConfig;
use crate::error::RelayError;

/// Keeps exporters alive for the life of the process. Dropping it flushes
/// buffered spans.
#[must_use = "dropping the guard shuts telemetry down"]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Failed to flush spans");
            }
        }
    }
}

/// Install the global subscriber and start the configured exporters.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard, RelayError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => log_filter(&config.log_level)?,
    };
    let logs = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter).with(logs);

    #[cfg(feature = "otel")]
    let (registry, tracer_provider) = {
        use opentelemetry::trace::TracerProvider;

        let provider = config
            .opentelemetry
            .as_ref()
            .map(otlp_tracer_provider)
            .transpose()?;
        let spans = provider
            .as_ref()
            .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("myhero-ernst")));
        (registry.with(spans), provider)
    };

    registry
        .try_init()
        .map_err(|e| RelayError::Telemetry(format!("tracing subscriber: {e}")))?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        serve_metrics(addr)?;
    }

    #[cfg(not(feature = "prometheus"))]
    if config.prometheus_addr.is_some() {
        tracing::warn!("prometheus_addr is set but the `prometheus` feature is not enabled");
    }

    info!(
        log_level = %config.log_level,
        prometheus = ?config.prometheus_addr,
        otlp = config.opentelemetry.as_ref().map(|o| o.endpoint.as_str()),
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        #[cfg(feature = "otel")]
        tracer_provider,
    })
}

/// Parse `telemetry.log_level` into a filter.
fn log_filter(level: &str) -> Result<EnvFilter, RelayError> {
    EnvFilter::try_new(level)
        .map_err(|e| RelayError::Config(format!("telemetry.log_level {level:?}: {e}")))
}

#[cfg(feature = "otel")]
fn otlp_tracer_provider(
    otel: &OpenTelemetryConfig,
) -> Result<opentelemetry_sdk::trace::SdkTracerProvider, RelayError> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
    use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otel.endpoint)
        .build()
        .map_err(|e| RelayError::Telemetry(format!("OTLP exporter for {}: {e}", otel.endpoint)))?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, otel.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

#[cfg(feature = "prometheus")]
fn serve_metrics(addr: SocketAddr) -> Result<(), RelayError> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| RelayError::Telemetry(format!("prometheus exporter on {addr}: {e}")))?;

    info!(%addr, "Serving vote metrics");
    Ok(())
}
