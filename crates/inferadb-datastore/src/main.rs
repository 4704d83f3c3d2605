//! # InferaDB Datastore Binary
//!
//! Runs a bootstrapped datastore until interrupted.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use inferadb_datastore::{DatastoreOptions, new_datastore};
use inferadb_datastore_config::load_or_default;
use inferadb_datastore_observe::{
    TelemetryCollector, TelemetryRegistry, TracingConfig, init_tracing_with_config,
};
use inferadb_datastore_store::cancellation;

#[derive(Parser, Debug)]
#[command(name = "inferadb-datastore")]
#[command(about = "InferaDB relationship datastore", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", env = "INFERADB_CONFIG")]
    config: String,

    /// Bootstrap file; may be repeated. Loaded after files from the config.
    #[arg(short, long)]
    bootstrap: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_or_default(&args.config);

    init_tracing_with_config(
        TracingConfig::builder()
            .level(config.logging.clone())
            .maybe_otlp_endpoint(config.telemetry.otlp_endpoint.clone())
            .build(),
    )?;

    config.validate().context("Configuration validation error")?;

    let mut options = DatastoreOptions::from_config(&config)?;
    options.bootstrap_files.extend(args.bootstrap);

    tracing::info!(engine = %options.engine, "Starting InferaDB datastore");
    let datastore = new_datastore(options).await?;

    let statistics = datastore.statistics().await?;
    tracing::info!(
        unique_id = %statistics.unique_id,
        relationships = statistics.estimated_relationship_count,
        object_types = statistics.object_type_statistics.len(),
        "Datastore statistics"
    );

    let (shutdown_tx, shutdown) = cancellation();
    let telemetry = if config.telemetry.enabled {
        let registry = Arc::new(TelemetryRegistry::new());
        let collector =
            TelemetryCollector::register(config.engine.clone(), datastore.clone(), registry.clone())
                .await?;
        let handle = collector.spawn(Duration::from_secs(config.telemetry.interval_secs), shutdown);
        tracing::info!(interval_secs = config.telemetry.interval_secs, "Telemetry enabled");
        Some((registry, handle))
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(());
    if let Some((registry, handle)) = telemetry {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Telemetry collector did not stop cleanly");
        }
        tracing::debug!(metrics = %registry.render(), "Final telemetry");
    }

    datastore.close().await?;
    tracing::info!("Datastore closed");
    Ok(())
}
