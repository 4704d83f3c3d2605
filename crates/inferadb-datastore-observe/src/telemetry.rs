//! Periodic telemetry
//!
//! [`TelemetryCollector`] reads datastore [`Statistics`] and metric counters
//! and publishes them as Prometheus gauges and counters. The recorder lives in
//! a [`TelemetryRegistry`] owned by the caller; nothing is installed globally,
//! so several datastores in one process keep separate registries.
//!
//! [`Statistics`]: inferadb_datastore_types::Statistics

use std::{fmt, sync::Arc, time::Duration};

use inferadb_datastore_store::{Datastore, MetricsSnapshot};
use inferadb_datastore_types::{DatastoreResult, Statistics};
use metrics::{Recorder, counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::metrics::{
    COMMIT_ERRORS_TOTAL, COMMITS_TOTAL, GC_COLLECTED_TOTAL, GC_RUNS_TOTAL, NAMESPACE_WRITES_TOTAL,
    OBJECT_DEFINITIONS_TOTAL, OBJECT_TYPE_RELATIONSHIPS, PRECONDITION_FAILURES_TOTAL,
    QUERIES_TOTAL, QUERY_ERRORS_TOTAL, RELATIONSHIPS_ESTIMATE_TOTAL,
    SERIALIZATION_CONFLICTS_TOTAL, TELEMETRY_INFO, WATCH_ACTIVE, WATCH_REVISIONS_DELIVERED_TOTAL,
    WATCH_SUBSCRIPTIONS_TOTAL, init_metrics_descriptions,
};

// ============================================================================
// Registry
// ============================================================================

/// A Prometheus recorder owned by the caller
pub struct TelemetryRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl TelemetryRegistry {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let registry = Self { recorder, handle };
        registry.record(init_metrics_descriptions);
        registry
    }

    /// Run `f` with this registry as the active metrics recorder
    pub fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.recorder as &dyn Recorder, f)
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for TelemetryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TelemetryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryRegistry").finish_non_exhaustive()
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Publishes one datastore's statistics into a [`TelemetryRegistry`]
#[derive(Debug, Clone)]
pub struct TelemetryCollector {
    datastore: Datastore,
    registry: Arc<TelemetryRegistry>,
    engine: String,
    cluster_id: String,
    node_id: String,
}

impl TelemetryCollector {
    /// Read statistics once to learn the datastore's identity
    pub async fn register(
        engine: impl Into<String>,
        datastore: Datastore,
        registry: Arc<TelemetryRegistry>,
    ) -> DatastoreResult<Self> {
        let statistics = datastore.statistics().await?;
        let collector = Self {
            datastore,
            registry,
            engine: engine.into(),
            cluster_id: statistics.unique_id.clone(),
            node_id: node_id(),
        };
        collector.publish(&statistics);
        tracing::info!(
            cluster_id = %collector.cluster_id,
            node_id = %collector.node_id,
            engine = %collector.engine,
            "Telemetry collector registered"
        );
        Ok(collector)
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Publish current statistics and counters
    ///
    /// On failure the previously published values are left in place.
    pub async fn collect(&self) -> DatastoreResult<()> {
        match self.datastore.statistics().await {
            Ok(statistics) => {
                self.publish(&statistics);
                Ok(())
            },
            Err(e) => {
                tracing::warn!(
                    cluster_id = %self.cluster_id,
                    error = %e,
                    "Telemetry collection failed"
                );
                Err(e)
            },
        }
    }

    /// Collect every `interval` until `shutdown` fires or its sender is dropped
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let _ = self.collect().await;
                    },
                }
            }
            tracing::debug!(cluster_id = %self.cluster_id, "Telemetry collector stopped");
        })
    }

    fn publish(&self, statistics: &Statistics) {
        let snapshot = self.datastore.metrics();
        self.registry.record(|| {
            let vcpu = std::thread::available_parallelism().map_or(1, |n| n.get());
            gauge!(
                TELEMETRY_INFO,
                "cluster_id" => self.cluster_id.clone(),
                "node_id" => self.node_id.clone(),
                "version" => env!("CARGO_PKG_VERSION"),
                "os" => std::env::consts::OS,
                "arch" => std::env::consts::ARCH,
                "vcpu" => vcpu.to_string(),
                "ds_engine" => self.engine.clone()
            )
            .set(1.0);
            gauge!(
                OBJECT_DEFINITIONS_TOTAL,
                "cluster_id" => self.cluster_id.clone(),
                "node_id" => self.node_id.clone()
            )
            .set(statistics.object_type_statistics.len() as f64);
            gauge!(
                RELATIONSHIPS_ESTIMATE_TOTAL,
                "cluster_id" => self.cluster_id.clone(),
                "node_id" => self.node_id.clone()
            )
            .set(statistics.estimated_relationship_count as f64);
            for object_type in &statistics.object_type_statistics {
                gauge!(OBJECT_TYPE_RELATIONSHIPS, "object_type" => object_type.object_type.clone())
                    .set(object_type.estimated_relationship_count as f64);
            }
            if let Some(snapshot) = snapshot {
                publish_counters(&snapshot);
            }
        });
    }
}

/// The host name this process reports as its node id
fn node_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            tracing::warn!("Unable to determine host name for telemetry; using 'unknown'");
            "unknown".to_string()
        })
}

fn publish_counters(snapshot: &MetricsSnapshot) {
    counter!(QUERIES_TOTAL).absolute(snapshot.query_count);
    counter!(QUERY_ERRORS_TOTAL).absolute(snapshot.query_errors);
    counter!(COMMITS_TOTAL).absolute(snapshot.commit_count);
    counter!(COMMIT_ERRORS_TOTAL).absolute(snapshot.commit_errors);
    counter!(PRECONDITION_FAILURES_TOTAL).absolute(snapshot.precondition_failures);
    counter!(SERIALIZATION_CONFLICTS_TOTAL).absolute(snapshot.serialization_conflicts);
    counter!(NAMESPACE_WRITES_TOTAL).absolute(snapshot.namespace_writes);
    counter!(WATCH_SUBSCRIPTIONS_TOTAL).absolute(snapshot.watch_subscriptions);
    gauge!(WATCH_ACTIVE).set(snapshot.watch_active as f64);
    counter!(WATCH_REVISIONS_DELIVERED_TOTAL).absolute(snapshot.watch_revisions_delivered);
    counter!(GC_RUNS_TOTAL).absolute(snapshot.gc_runs);
    counter!(GC_COLLECTED_TOTAL).absolute(snapshot.gc_collected);
}
