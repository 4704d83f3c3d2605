//! Datastore operation metrics

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Datastore operation metrics
///
/// Engines own one instance and record into it; exporters read
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct DatastoreMetrics {
    // Query metrics
    query_count: AtomicU64,
    query_latency_us: AtomicU64,
    query_errors: AtomicU64,

    // Commit metrics
    commit_count: AtomicU64,
    commit_latency_us: AtomicU64,
    commit_errors: AtomicU64,
    precondition_failures: AtomicU64,
    serialization_conflicts: AtomicU64,

    // Namespace metrics
    namespace_writes: AtomicU64,

    // Watch metrics
    watch_subscriptions: AtomicU64,
    watch_active: AtomicU64,
    watch_revisions_delivered: AtomicU64,

    // Garbage collection
    gc_runs: AtomicU64,
    gc_collected: AtomicU64,
}

impl DatastoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a query execution
    pub fn record_query(&self, duration: Duration, error: bool) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.query_latency_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if error {
            self.query_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a commit attempt
    pub fn record_commit(&self, duration: Duration, error: bool) {
        self.commit_count.fetch_add(1, Ordering::Relaxed);
        self.commit_latency_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if error {
            self.commit_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_precondition_failure(&self) {
        self.precondition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_serialization_conflict(&self) {
        self.serialization_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_namespace_write(&self) {
        self.namespace_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_started(&self) {
        self.watch_subscriptions.fetch_add(1, Ordering::Relaxed);
        self.watch_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_stopped(&self) {
        let _ = self.watch_active.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| {
            Some(active.saturating_sub(1))
        });
    }

    pub fn record_watch_delivery(&self) {
        self.watch_revisions_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a garbage collection pass and how many versions it dropped
    pub fn record_gc(&self, collected: u64) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.gc_collected.fetch_add(collected, Ordering::Relaxed);
    }

    /// Get metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let query_count = self.query_count.load(Ordering::Relaxed);
        let commit_count = self.commit_count.load(Ordering::Relaxed);
        let query_latency_us = self.query_latency_us.load(Ordering::Relaxed);
        let commit_latency_us = self.commit_latency_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            query_count,
            query_avg_latency_us: if query_count > 0 { query_latency_us / query_count } else { 0 },
            query_errors: self.query_errors.load(Ordering::Relaxed),
            commit_count,
            commit_avg_latency_us: if commit_count > 0 {
                commit_latency_us / commit_count
            } else {
                0
            },
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
            precondition_failures: self.precondition_failures.load(Ordering::Relaxed),
            serialization_conflicts: self.serialization_conflicts.load(Ordering::Relaxed),
            namespace_writes: self.namespace_writes.load(Ordering::Relaxed),
            watch_subscriptions: self.watch_subscriptions.load(Ordering::Relaxed),
            watch_active: self.watch_active.load(Ordering::Relaxed),
            watch_revisions_delivered: self.watch_revisions_delivered.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            gc_collected: self.gc_collected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub query_count: u64,
    pub query_avg_latency_us: u64,
    pub query_errors: u64,
    pub commit_count: u64,
    pub commit_avg_latency_us: u64,
    pub commit_errors: u64,
    pub precondition_failures: u64,
    pub serialization_conflicts: u64,
    pub namespace_writes: u64,
    pub watch_subscriptions: u64,
    pub watch_active: u64,
    pub watch_revisions_delivered: u64,
    pub gc_runs: u64,
    pub gc_collected: u64,
}

/// Helper to measure operation duration
pub struct OpTimer {
    start: Instant,
}

impl OpTimer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for OpTimer {
    fn default() -> Self {
        Self::new()
    }
}
