//! Datastore facade
//!
//! [`Datastore`] composes the three capability sets an engine provides into one
//! cloneable handle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    Datastore                    │
//! ├────────────────┬────────────────┬───────────────┤
//! │   Namespaces   │ Relationships  │  DataSource   │
//! │ (schema CRUD)  │ (revisions,    │ (ready, stats,│
//! │                │  txns, watch)  │  close)       │
//! └────────────────┴────────────────┴───────────────┘
//! ```

use std::{sync::Arc, time::Duration};

use inferadb_datastore_const::{READY_INITIAL_BACKOFF_MS, READY_MAX_BACKOFF_MS};
use inferadb_datastore_types::{DatastoreError, NamespaceDefinition, Revision, Statistics};
use tokio::{sync::watch, time::Instant};

use crate::{
    DataSource, Engine, MetricsSnapshot, Namespaces, ReadOnlyTransaction, Relationships, Result,
    Transaction, WatchSubscription,
};

/// Unified datastore handle
///
/// Each capability can be supplied independently, which keeps them testable
/// in isolation; [`Datastore::from_engine`] covers the common case of one
/// engine providing all three.
#[derive(Clone)]
pub struct Datastore {
    namespaces: Arc<dyn Namespaces>,
    relationships: Arc<dyn Relationships>,
    source: Arc<dyn DataSource>,
}

#[bon::bon]
impl Datastore {
    #[builder]
    pub fn new(
        namespaces: Arc<dyn Namespaces>,
        relationships: Arc<dyn Relationships>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        Self { namespaces, relationships, source }
    }
}

impl Datastore {
    pub fn from_engine<E: Engine + 'static>(engine: Arc<E>) -> Self {
        Self { namespaces: engine.clone(), relationships: engine.clone(), source: engine }
    }

    pub fn namespaces(&self) -> &Arc<dyn Namespaces> {
        &self.namespaces
    }

    pub fn relationships(&self) -> &Arc<dyn Relationships> {
        &self.relationships
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    // =========================================================================
    // Revisions and Transactions
    // =========================================================================

    pub async fn head_revision(&self) -> Result<Revision> {
        self.relationships.head_revision().await
    }

    pub async fn quantized_revision(&self) -> Result<Revision> {
        self.relationships.quantized_revision().await
    }

    pub async fn begin_read_only(
        &self,
        revision: Revision,
    ) -> Result<Box<dyn ReadOnlyTransaction>> {
        self.relationships.begin_read_only(revision).await
    }

    pub async fn begin(&self, revision: Revision) -> Result<Box<dyn Transaction>> {
        self.relationships.begin(revision).await
    }

    /// Open a read-write transaction at the current head revision
    pub async fn begin_at_head(&self) -> Result<Box<dyn Transaction>> {
        let revision = self.relationships.head_revision().await?;
        self.relationships.begin(revision).await
    }

    pub fn watch(
        &self,
        after_revision: Revision,
        cancel: watch::Receiver<()>,
    ) -> WatchSubscription {
        self.relationships.watch(after_revision, cancel)
    }

    // =========================================================================
    // Namespaces
    // =========================================================================

    pub async fn write_namespace(&self, definition: NamespaceDefinition) -> Result<Revision> {
        self.namespaces.write_namespace(definition).await
    }

    pub async fn read_namespace(&self, name: &str) -> Result<(NamespaceDefinition, Revision)> {
        self.namespaces.read_namespace(name).await
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<Revision> {
        self.namespaces.delete_namespace(name).await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<NamespaceDefinition>> {
        self.namespaces.list_namespaces().await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn is_ready(&self) -> Result<bool> {
        self.source.is_ready().await
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        self.source.statistics().await
    }

    pub async fn close(&self) -> Result<()> {
        self.source.close().await
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.source.metrics()
    }

    /// Poll [`is_ready`](Self::is_ready) with exponential backoff
    ///
    /// Transient readiness errors are retried; `Closed` and other permanent
    /// errors are returned immediately. Fails with `BackendUnavailable` when
    /// the engine is still not ready after `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(READY_INITIAL_BACKOFF_MS);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.source.is_ready().await {
                Ok(true) => {
                    tracing::debug!(attempts, "Datastore ready");
                    return Ok(());
                },
                Ok(false) => tracing::debug!(attempts, "Datastore not ready yet"),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempts, error = %e, "Datastore readiness check failed");
                },
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DatastoreError::BackendUnavailable(format!(
                    "datastore not ready after {attempts} attempts"
                )));
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(Duration::from_millis(READY_MAX_BACKOFF_MS));
        }
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Reports ready after a fixed number of checks, failing transiently before that
    struct WarmingSource {
        checks: AtomicU32,
        ready_after: u32,
    }

    #[async_trait]
    impl DataSource for WarmingSource {
        async fn is_ready(&self) -> Result<bool> {
            let attempt = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            match attempt {
                1 => Err(DatastoreError::BackendUnavailable("warming up".into())),
                n => Ok(n >= self.ready_after),
            }
        }

        async fn statistics(&self) -> Result<Statistics> {
            Ok(Statistics {
                unique_id: "test".into(),
                estimated_relationship_count: 0,
                object_type_statistics: vec![],
            })
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct ClosedSource;

    #[async_trait]
    impl DataSource for ClosedSource {
        async fn is_ready(&self) -> Result<bool> {
            Err(DatastoreError::Closed("datastore closed".into()))
        }

        async fn statistics(&self) -> Result<Statistics> {
            Err(DatastoreError::Closed("datastore closed".into()))
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Namespace and relationship capabilities that are never reached
    struct Unreachable;

    #[async_trait]
    impl Namespaces for Unreachable {
        async fn write_namespace(&self, _: NamespaceDefinition) -> Result<Revision> {
            unreachable!()
        }

        async fn read_namespace(&self, name: &str) -> Result<(NamespaceDefinition, Revision)> {
            Err(DatastoreError::NotFound(name.to_string()))
        }

        async fn delete_namespace(&self, _: &str) -> Result<Revision> {
            unreachable!()
        }

        async fn list_namespaces(&self) -> Result<Vec<NamespaceDefinition>> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl Relationships for Unreachable {
        async fn head_revision(&self) -> Result<Revision> {
            Ok(Revision(1))
        }

        async fn quantized_revision(&self) -> Result<Revision> {
            Ok(Revision(1))
        }

        async fn begin_read_only(&self, _: Revision) -> Result<Box<dyn ReadOnlyTransaction>> {
            unreachable!()
        }

        async fn begin(&self, _: Revision) -> Result<Box<dyn Transaction>> {
            unreachable!()
        }

        fn watch(&self, _: Revision, _: watch::Receiver<()>) -> WatchSubscription {
            unreachable!()
        }
    }

    fn datastore(source: Arc<dyn DataSource>) -> Datastore {
        Datastore::builder()
            .namespaces(Arc::new(Unreachable))
            .relationships(Arc::new(Unreachable))
            .source(source)
            .build()
    }

    #[tokio::test]
    async fn test_wait_until_ready_retries_transient_failures() {
        let source = Arc::new(WarmingSource { checks: AtomicU32::new(0), ready_after: 3 });
        datastore(source.clone()).wait_until_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(source.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let source = Arc::new(WarmingSource { checks: AtomicU32::new(0), ready_after: u32::MAX });
        let err = datastore(source).wait_until_ready(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, DatastoreError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_wait_until_ready_stops_on_permanent_error() {
        let err = datastore(Arc::new(ClosedSource))
            .wait_until_ready(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DatastoreError::Closed(_)));
    }

    #[tokio::test]
    async fn test_facade_delegates_to_each_capability() {
        let ds = datastore(Arc::new(WarmingSource { checks: AtomicU32::new(0), ready_after: 0 }));
        assert_eq!(ds.head_revision().await.unwrap(), Revision(1));
        assert!(ds.list_namespaces().await.unwrap().is_empty());
        assert!(matches!(ds.read_namespace("user").await, Err(DatastoreError::NotFound(_))));
        assert_eq!(ds.statistics().await.unwrap().unique_id, "test");
        assert!(ds.metrics().is_none());
    }
}
