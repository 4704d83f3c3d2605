//! # InferaDB Datastore Memory - In-Memory Engine
//!
//! A complete implementation of the datastore contract held in process memory.
//! It is the reference engine for tests and development, and the behaviour
//! other engines are checked against.
//!
//! - Every relationship keeps its version lifetimes, so any retained revision
//!   can be read (snapshot isolation).
//! - Commits are optimistic: a transaction conflicts when a commit after its
//!   pinned revision touched anything it read or wrote.
//! - Revisions older than the GC window are collected; reading them fails with
//!   `InvalidRevision`.

#![deny(unsafe_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use inferadb_datastore_const::{
    DEFAULT_GC_WINDOW_SECS, DEFAULT_QUANTIZATION_INTERVAL_MS, DEFAULT_WATCH_BATCH_SIZE,
    DEFAULT_WATCH_BUFFER_LENGTH,
};
use inferadb_datastore_store::{
    DataSource, DatastoreMetrics, MetricsSnapshot, Namespaces, ReadOnlyTransaction,
    Relationships, Transaction, WatchSubscription,
};
use inferadb_datastore_types::{
    DatastoreError, DatastoreResult, NamespaceDefinition, Precondition, Revision, Statistics,
};
use tokio::sync::{RwLock, watch};

mod revisions;
mod state;
mod transaction;
mod watch_producer;

use revisions::RevisionClock;
use state::{MemoryState, StagedOp};
pub use transaction::{MemoryReadOnlyTransaction, MemoryTransaction};

type Result<T> = DatastoreResult<T>;

/// Tuning knobs for the in-memory engine
#[derive(Debug, Clone, bon::Builder)]
pub struct MemoryEngineOptions {
    /// Width of the window quantized revisions are shared across; zero means
    /// quantized revisions equal head
    #[builder(default = Duration::from_millis(DEFAULT_QUANTIZATION_INTERVAL_MS))]
    pub quantization_interval: Duration,

    /// Age after which revisions are garbage collected; zero disables
    /// automatic collection
    #[builder(default = Duration::from_secs(DEFAULT_GC_WINDOW_SECS))]
    pub gc_window: Duration,

    /// Capacity of each watch subscription's data channel
    #[builder(default = DEFAULT_WATCH_BUFFER_LENGTH)]
    pub watch_buffer_length: usize,

    /// History entries a watch producer reads per pass
    #[builder(default = DEFAULT_WATCH_BATCH_SIZE)]
    pub watch_batch_size: usize,
}

impl Default for MemoryEngineOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// State shared by the engine handle, its transactions, iterators and watch producers
#[derive(Debug)]
pub(crate) struct Inner {
    state: RwLock<MemoryState>,
    options: MemoryEngineOptions,
    clock: RevisionClock,
    /// Carries the head revision; watch producers wait on it
    head_tx: watch::Sender<Revision>,
    closed: AtomicBool,
    metrics: DatastoreMetrics,
    unique_id: String,
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DatastoreError::Closed("datastore closed".to_string()));
        }
        Ok(())
    }

    /// Validate and apply a read-write transaction
    async fn commit(
        &self,
        pinned: Revision,
        preconditions: &[Precondition],
        staged: &[StagedOp],
    ) -> Result<Revision> {
        let mut state = self.state.write().await;
        self.ensure_open()?;

        if pinned < state.oldest_retained() {
            return Err(DatastoreError::invalid_revision(
                pinned,
                "transaction snapshot was garbage collected before commit",
            ));
        }

        // Precondition verdicts depend only on the pinned snapshot
        if let Some(violated) = state.first_violation(preconditions, pinned) {
            self.metrics.record_precondition_failure();
            return Err(DatastoreError::precondition_failed(violated.clone()));
        }

        if let Some(conflict) = state.find_conflict(pinned, preconditions, staged) {
            self.metrics.record_serialization_conflict();
            tracing::debug!(
                pinned = %pinned,
                conflict = %conflict,
                "Commit conflicts with a concurrent transaction"
            );
            return Err(DatastoreError::SerializationConflict(format!(
                "revision {conflict} changed data read or written by a transaction at revision \
                 {pinned}"
            )));
        }

        let plan = state.plan(staged).inspect_err(|e| {
            if matches!(e, DatastoreError::PreconditionFailed(_)) {
                self.metrics.record_precondition_failure();
            }
        })?;

        let revision = state.head().next();
        let now = self.clock.now();
        let changes = plan.change_count();
        state.apply(plan, revision, now);
        self.collect_expired(&mut state, now);
        drop(state);

        self.head_tx.send_replace(revision);
        tracing::debug!(revision = %revision, changes, "Committed transaction");
        Ok(revision)
    }

    /// Collect revisions that fell out of the GC window
    fn collect_expired(&self, state: &mut MemoryState, now: Duration) {
        let window = self.options.gc_window;
        if window.is_zero() || now <= window {
            return;
        }
        let cutoff = state.revision_at_or_before(now - window);
        if cutoff > state.oldest_retained() {
            let collected = state.collect_garbage(cutoff);
            self.metrics.record_gc(collected as u64);
            tracing::debug!(before = %cutoff, collected, "Garbage collected expired revisions");
        }
    }
}

/// The in-memory datastore engine
///
/// Cloning is cheap; clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryDatastore {
    inner: Arc<Inner>,
}

impl MemoryDatastore {
    pub fn new(options: MemoryEngineOptions) -> Self {
        let state = MemoryState::new();
        let (head_tx, _) = watch::channel(state.head());
        let unique_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(
            unique_id = %unique_id,
            quantization_interval_ms = options.quantization_interval.as_millis() as u64,
            gc_window_secs = options.gc_window.as_secs(),
            "Memory datastore initialized"
        );

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                clock: RevisionClock::new(options.quantization_interval),
                options,
                head_tx,
                closed: AtomicBool::new(false),
                metrics: DatastoreMetrics::new(),
                unique_id,
            }),
        }
    }

    /// Drop history older than `before`. Reads, transactions and watches at
    /// earlier revisions fail with `InvalidRevision` afterwards.
    /// Returns the number of relationship versions removed.
    pub async fn collect_garbage(&self, before: Revision) -> Result<usize> {
        self.inner.ensure_open()?;
        let mut state = self.inner.state.write().await;
        let collected = state.collect_garbage(before);
        self.inner.metrics.record_gc(collected as u64);
        tracing::debug!(before = %before, collected, "Garbage collected revisions");
        Ok(collected)
    }

    /// Oldest revision that can still be read
    pub async fn oldest_retained_revision(&self) -> Result<Revision> {
        self.inner.ensure_open()?;
        Ok(self.inner.state.read().await.oldest_retained())
    }

    /// Commit a new revision under the write lock
    async fn commit_namespace_change<T>(
        &self,
        change: impl FnOnce(&mut MemoryState, Revision, Duration) -> Result<T>,
    ) -> Result<(Revision, T)> {
        let mut state = self.inner.state.write().await;
        self.inner.ensure_open()?;
        let revision = state.head().next();
        let now = self.inner.clock.now();
        let output = change(&mut state, revision, now)?;
        self.inner.collect_expired(&mut state, now);
        drop(state);

        self.inner.head_tx.send_replace(revision);
        self.inner.metrics.record_namespace_write();
        Ok((revision, output))
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new(MemoryEngineOptions::default())
    }
}

#[async_trait]
impl DataSource for MemoryDatastore {
    async fn is_ready(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(true)
    }

    async fn statistics(&self) -> Result<Statistics> {
        self.inner.ensure_open()?;
        let state = self.inner.state.read().await;
        Ok(Statistics {
            unique_id: self.inner.unique_id.clone(),
            estimated_relationship_count: state.live_relationship_count(),
            object_type_statistics: state.object_type_statistics(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Wake watch producers so they observe the closed flag
        self.inner.head_tx.send_modify(|_| {});
        tracing::info!(unique_id = %self.inner.unique_id, "Memory datastore closed");
        Ok(())
    }

    fn metrics(&self) -> Option<MetricsSnapshot> {
        Some(self.inner.metrics.snapshot())
    }
}

#[async_trait]
impl Namespaces for MemoryDatastore {
    async fn write_namespace(&self, definition: NamespaceDefinition) -> Result<Revision> {
        definition.validate()?;
        let name = definition.name.clone();
        let (revision, ()) = self
            .commit_namespace_change(|state, revision, now| {
                state.write_namespace(definition, revision, now);
                Ok(())
            })
            .await?;
        tracing::info!(namespace = %name, revision = %revision, "Wrote namespace");
        Ok(revision)
    }

    async fn read_namespace(&self, name: &str) -> Result<(NamespaceDefinition, Revision)> {
        self.inner.ensure_open()?;
        let state = self.inner.state.read().await;
        state
            .namespace(name)
            .cloned()
            .ok_or_else(|| DatastoreError::NotFound(format!("namespace '{name}'")))
    }

    async fn delete_namespace(&self, name: &str) -> Result<Revision> {
        let (revision, deleted) = self
            .commit_namespace_change(|state, revision, now| {
                state.delete_namespace(name, revision, now)
            })
            .await?;
        tracing::info!(
            namespace = %name,
            revision = %revision,
            relationships_deleted = deleted,
            "Deleted namespace"
        );
        Ok(revision)
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceDefinition>> {
        self.inner.ensure_open()?;
        let state = self.inner.state.read().await;
        Ok(state.namespaces().cloned().collect())
    }
}

#[async_trait]
impl Relationships for MemoryDatastore {
    async fn head_revision(&self) -> Result<Revision> {
        self.inner.ensure_open()?;
        Ok(self.inner.state.read().await.head())
    }

    async fn quantized_revision(&self) -> Result<Revision> {
        self.inner.ensure_open()?;
        let state = self.inner.state.read().await;
        if self.inner.clock.is_disabled() {
            return Ok(self.inner.clock.observe(state.head()));
        }
        let window_start = self.inner.clock.window_start(self.inner.clock.now());
        let candidate = state.revision_at_or_before(window_start).max(state.oldest_retained());
        Ok(self.inner.clock.observe(candidate))
    }

    async fn begin_read_only(&self, revision: Revision) -> Result<Box<dyn ReadOnlyTransaction>> {
        self.inner.ensure_open()?;
        self.inner.state.read().await.check_readable(revision)?;
        Ok(Box::new(MemoryReadOnlyTransaction::new(self.inner.clone(), revision)))
    }

    async fn begin(&self, revision: Revision) -> Result<Box<dyn Transaction>> {
        self.inner.ensure_open()?;
        self.inner.state.read().await.check_readable(revision)?;
        Ok(Box::new(MemoryTransaction::new(self.inner.clone(), revision)))
    }

    fn watch(&self, after_revision: Revision, cancel: watch::Receiver<()>) -> WatchSubscription {
        watch_producer::spawn(self.inner.clone(), after_revision, cancel)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use inferadb_datastore_store::collect_relationships;
    use inferadb_datastore_test_fixtures::{rel, touch};
    use inferadb_datastore_types::ObjectFilter;

    use super::*;

    fn engine() -> MemoryDatastore {
        let options = MemoryEngineOptions::builder().quantization_interval(Duration::ZERO).build();
        MemoryDatastore::new(options)
    }

    async fn write(ds: &MemoryDatastore, relationships: &[&str]) -> Revision {
        let head = ds.head_revision().await.unwrap();
        let mut tx = ds.begin(head).await.unwrap();
        tx.write_relationships(relationships.iter().map(|r| touch(r)).collect()).await.unwrap();
        tx.commit().await.unwrap()
    }

    #[tokio::test]
    async fn test_initial_head_is_not_the_sentinel() {
        let ds = engine();
        let head = ds.head_revision().await.unwrap();
        assert!(!head.is_none());
        assert!(ds.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn test_quantized_revision_with_zero_interval_is_head() {
        let ds = engine();
        let revision = write(&ds, &["document:a#viewer@user:alice"]).await;
        assert_eq!(ds.quantized_revision().await.unwrap(), revision);
    }

    #[tokio::test]
    async fn test_quantized_revision_is_shared_within_window() {
        let ds = MemoryDatastore::new(
            MemoryEngineOptions::builder().quantization_interval(Duration::from_secs(3600)).build(),
        );
        let initial = ds.quantized_revision().await.unwrap();
        write(&ds, &["document:a#viewer@user:alice"]).await;
        write(&ds, &["document:b#viewer@user:alice"]).await;
        assert_eq!(ds.quantized_revision().await.unwrap(), initial);
        assert!(ds.head_revision().await.unwrap() > initial);
    }

    #[tokio::test]
    async fn test_statistics_counts_per_namespace() {
        let ds = engine();
        ds.write_namespace(NamespaceDefinition::new("document")).await.unwrap();
        ds.write_namespace(NamespaceDefinition::new("user")).await.unwrap();
        write(&ds, &["document:a#viewer@user:alice", "document:b#viewer@user:bob"]).await;

        let stats = ds.statistics().await.unwrap();
        assert_eq!(stats.estimated_relationship_count, 2);
        assert_eq!(stats.object_type_statistics.len(), 2);
        let document =
            stats.object_type_statistics.iter().find(|s| s.object_type == "document").unwrap();
        assert_eq!(document.estimated_relationship_count, 2);
        assert!(uuid::Uuid::parse_str(&stats.unique_id).is_ok());
        assert_eq!(ds.statistics().await.unwrap().unique_id, stats.unique_id);
    }

    #[tokio::test]
    async fn test_namespace_writes_advance_head() {
        let ds = engine();
        let before = ds.head_revision().await.unwrap();
        let revision = ds.write_namespace(NamespaceDefinition::new("user")).await.unwrap();
        assert!(revision > before);
        assert_eq!(ds.head_revision().await.unwrap(), revision);
        let (definition, written_at) = ds.read_namespace("user").await.unwrap();
        assert_eq!(definition, NamespaceDefinition::new("user"));
        assert_eq!(written_at, revision);
    }

    #[tokio::test]
    async fn test_invalid_namespace_is_rejected() {
        let ds = engine();
        let err = ds.write_namespace(NamespaceDefinition::new("Not Valid")).await.unwrap_err();
        assert!(matches!(err, DatastoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_collect_garbage_invalidates_old_revisions() {
        let ds = engine();
        let r2 = write(&ds, &["document:a#viewer@user:alice"]).await;
        let r3 = write(&ds, &["document:b#viewer@user:alice"]).await;
        ds.collect_garbage(r3).await.unwrap();

        assert_eq!(ds.oldest_retained_revision().await.unwrap(), r3);
        assert!(matches!(
            ds.begin_read_only(r2).await.err().unwrap(),
            DatastoreError::InvalidRevision { .. }
        ));
        let tx = ds.begin_read_only(r3).await.unwrap();
        let results = collect_relationships(
            tx.query_relationships(ObjectFilter::of_type("document")).execute().await.unwrap(),
        )
        .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_commit_after_snapshot_collected_fails() {
        let ds = engine();
        let pinned = ds.head_revision().await.unwrap();
        let mut tx = ds.begin(pinned).await.unwrap();
        let head = write(&ds, &["document:a#viewer@user:alice"]).await;
        ds.collect_garbage(head).await.unwrap();

        tx.write_relationships(vec![touch("document:b#viewer@user:bob")]).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, DatastoreError::InvalidRevision { .. }));
    }

    #[tokio::test]
    async fn test_automatic_gc_respects_window() {
        let ds = MemoryDatastore::new(
            MemoryEngineOptions::builder()
                .quantization_interval(Duration::ZERO)
                .gc_window(Duration::from_millis(20))
                .build(),
        );
        let first = write(&ds, &["document:a#viewer@user:alice"]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        write(&ds, &["document:b#viewer@user:alice"]).await;

        let oldest = ds.oldest_retained_revision().await.unwrap();
        assert!(oldest >= first);
        assert!(ds.metrics().unwrap().gc_runs >= 1);
    }

    #[tokio::test]
    async fn test_close_fails_every_later_call() {
        let ds = engine();
        let head = ds.head_revision().await.unwrap();
        let tx = ds.begin_read_only(head).await.unwrap();

        ds.close().await.unwrap();
        ds.close().await.unwrap();

        assert!(matches!(ds.is_ready().await, Err(DatastoreError::Closed(_))));
        assert!(matches!(ds.head_revision().await, Err(DatastoreError::Closed(_))));
        assert!(matches!(ds.statistics().await, Err(DatastoreError::Closed(_))));
        assert!(matches!(ds.list_namespaces().await, Err(DatastoreError::Closed(_))));
        assert!(matches!(
            tx.query_relationships(ObjectFilter::of_type("document")).execute().await,
            Err(DatastoreError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_iterator_reports_close_as_deferred_error() {
        let ds = engine();
        write(&ds, &["document:a#viewer@user:alice", "document:b#viewer@user:alice"]).await;
        let head = ds.head_revision().await.unwrap();
        let tx = ds.begin_read_only(head).await.unwrap();
        let mut iterator =
            tx.query_relationships(ObjectFilter::of_type("document")).execute().await.unwrap();

        assert_eq!(iterator.next(), Some(rel("document:a#viewer@user:alice")));
        ds.close().await.unwrap();
        assert_eq!(iterator.next(), None);
        assert!(matches!(iterator.err(), Some(DatastoreError::Closed(_))));
        iterator.close();
    }

    #[tokio::test]
    async fn test_metrics_track_commits_and_queries() {
        let ds = engine();
        write(&ds, &["document:a#viewer@user:alice"]).await;
        let head = ds.head_revision().await.unwrap();
        let tx = ds.begin_read_only(head).await.unwrap();
        let _ = collect_relationships(
            tx.query_relationships(ObjectFilter::of_type("document")).execute().await.unwrap(),
        );

        let metrics = ds.metrics().unwrap();
        assert_eq!(metrics.commit_count, 1);
        assert_eq!(metrics.query_count, 1);
    }
}
