//! # InferaDB Datastore Observe - Observability Layer
//!
//! Tracing initialisation, metric descriptions and the telemetry collector
//! that publishes datastore statistics into a Prometheus registry.

#![deny(unsafe_code)]

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub mod metrics;
pub mod telemetry;

pub use telemetry::{TelemetryCollector, TelemetryRegistry};

/// Configuration for tracing output and optional OTLP export
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(String, into))]
pub struct TracingConfig {
    #[builder(default = "inferadb-datastore".to_string())]
    pub service_name: String,
    /// Default filter directive when `RUST_LOG` is unset
    #[builder(default = "info".to_string())]
    pub level: String,
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
    /// Sample rate (0.0 to 1.0)
    #[builder(default = 1.0)]
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Initialize tracing, with OpenTelemetry export when an endpoint is set
///
/// Calling this again after a subscriber is installed is not an error.
pub fn init_tracing_with_config(config: TracingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},inferadb=debug", config.level)));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    let otlp_enabled = config.otlp_endpoint.is_some();
    if let Some(endpoint) = config.otlp_endpoint {
        let exporter = SpanExporter::builder().with_tonic().with_endpoint(endpoint).build()?;

        let resource = opentelemetry_sdk::Resource::builder()
            .with_service_name(config.service_name.clone())
            .build();

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::TraceIdRatioBased(config.sample_rate))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource)
            .build();

        let telemetry_layer = tracing_opentelemetry::layer()
            .with_tracer(tracer_provider.tracer(config.service_name.clone()));

        if subscriber.with(telemetry_layer).try_init().is_err() {
            tracing::debug!("Tracing already initialized, skipping");
            return Ok(());
        }
    } else if subscriber.try_init().is_err() {
        tracing::debug!("Tracing already initialized, skipping");
        return Ok(());
    }

    tracing::info!(service = config.service_name, otlp_enabled, "Tracing initialized");
    Ok(())
}

/// Initialize tracing with default configuration
pub fn init_tracing() -> Result<()> {
    init_tracing_with_config(TracingConfig::default())
}
