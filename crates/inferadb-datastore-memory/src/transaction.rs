//! Snapshot transactions, their query executor and iterator

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use inferadb_datastore_store::{
    OpTimer, QueryExecutor, QuerySpec, ReadOnlyTransaction, RelationshipIterator,
    RelationshipQuery, ReverseRelationshipQuery, Transaction,
};
use inferadb_datastore_types::{
    DatastoreError, ObjectFilter, Precondition, Relationship, RelationshipFilter,
    RelationshipUpdate, Revision,
};

use crate::{Inner, Result, state::StagedOp};

/// Reads one pinned revision on behalf of a transaction and the query
/// builders it handed out
#[derive(Debug)]
pub(crate) struct SnapshotExecutor {
    inner: Arc<Inner>,
    revision: Revision,
    finished: AtomicBool,
}

impl SnapshotExecutor {
    fn new(inner: Arc<Inner>, revision: Revision) -> Arc<Self> {
        Arc::new(Self { inner, revision, finished: AtomicBool::new(false) })
    }

    fn ensure_active(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.finished.load(Ordering::Acquire) {
            return Err(DatastoreError::Closed("transaction already finished".to_string()));
        }
        Ok(())
    }

    /// Mark the transaction finished; returns whether it was still active
    fn finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    async fn check_preconditions(&self, preconditions: &[Precondition]) -> Result<()> {
        self.ensure_active()?;
        let state = self.inner.state.read().await;
        state.check_readable(self.revision)?;
        if let Some(violated) = state.first_violation(preconditions, self.revision) {
            self.inner.metrics.record_precondition_failure();
            return Err(DatastoreError::precondition_failed(violated.clone()));
        }
        Ok(())
    }

    async fn run(&self, query: QuerySpec) -> Result<Box<dyn RelationshipIterator>> {
        self.ensure_active()?;
        let state = self.inner.state.read().await;
        state.check_readable(self.revision)?;
        let results = state.scan(&query, self.revision);
        Ok(Box::new(MemoryIterator {
            items: results.into_iter(),
            inner: self.inner.clone(),
            error: None,
            closed: false,
        }))
    }
}

#[async_trait]
impl QueryExecutor for SnapshotExecutor {
    async fn execute(&self, query: QuerySpec) -> Result<Box<dyn RelationshipIterator>> {
        let timer = OpTimer::new();
        let result = self.run(query).await;
        self.inner.metrics.record_query(timer.elapsed(), result.is_err());
        result
    }
}

/// Iterator over materialized query results
///
/// Closing the datastore mid-iteration ends the sequence with a `Closed` error.
struct MemoryIterator {
    items: std::vec::IntoIter<Relationship>,
    inner: Arc<Inner>,
    error: Option<DatastoreError>,
    closed: bool,
}

impl RelationshipIterator for MemoryIterator {
    fn next(&mut self) -> Option<Relationship> {
        if self.closed || self.error.is_some() {
            return None;
        }
        if let Err(e) = self.inner.ensure_open() {
            self.error = Some(e);
            return None;
        }
        self.items.next()
    }

    fn err(&self) -> Option<&DatastoreError> {
        self.error.as_ref()
    }

    fn close(&mut self) {
        self.closed = true;
        self.items = Vec::new().into_iter();
    }
}

// ============================================================================
// Read-Only Transaction
// ============================================================================

#[derive(Debug)]
pub struct MemoryReadOnlyTransaction {
    executor: Arc<SnapshotExecutor>,
}

impl MemoryReadOnlyTransaction {
    pub(crate) fn new(inner: Arc<Inner>, revision: Revision) -> Self {
        Self { executor: SnapshotExecutor::new(inner, revision) }
    }
}

#[async_trait]
impl ReadOnlyTransaction for MemoryReadOnlyTransaction {
    fn revision(&self) -> Revision {
        self.executor.revision
    }

    fn query_relationships(&self, filter: ObjectFilter) -> RelationshipQuery {
        RelationshipQuery::new(self.executor.clone(), filter)
    }

    fn reverse_query_relationships(&self, filter: ObjectFilter) -> ReverseRelationshipQuery {
        ReverseRelationshipQuery::new(self.executor.clone(), filter)
    }

    async fn check_preconditions(&mut self, preconditions: &[Precondition]) -> Result<()> {
        self.executor.check_preconditions(preconditions).await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.executor.finish();
        Ok(())
    }
}

impl Drop for MemoryReadOnlyTransaction {
    fn drop(&mut self) {
        self.executor.finish();
    }
}

// ============================================================================
// Read-Write Transaction
// ============================================================================

/// Stages mutations locally; nothing is visible to other readers until commit
///
/// Queries read the pinned snapshot only, not the transaction's own staged
/// mutations.
#[derive(Debug)]
pub struct MemoryTransaction {
    executor: Arc<SnapshotExecutor>,
    staged: Vec<StagedOp>,
    preconditions: Vec<Precondition>,
}

impl MemoryTransaction {
    pub(crate) fn new(inner: Arc<Inner>, revision: Revision) -> Self {
        Self {
            executor: SnapshotExecutor::new(inner, revision),
            staged: Vec::new(),
            preconditions: Vec::new(),
        }
    }

    fn discard(&mut self) -> usize {
        let discarded = self.staged.len();
        self.staged.clear();
        self.preconditions.clear();
        discarded
    }
}

#[async_trait]
impl ReadOnlyTransaction for MemoryTransaction {
    fn revision(&self) -> Revision {
        self.executor.revision
    }

    fn query_relationships(&self, filter: ObjectFilter) -> RelationshipQuery {
        RelationshipQuery::new(self.executor.clone(), filter)
    }

    fn reverse_query_relationships(&self, filter: ObjectFilter) -> ReverseRelationshipQuery {
        ReverseRelationshipQuery::new(self.executor.clone(), filter)
    }

    /// Checked preconditions are bound to the commit whether or not they hold now
    async fn check_preconditions(&mut self, preconditions: &[Precondition]) -> Result<()> {
        self.executor.ensure_active()?;
        self.preconditions.extend_from_slice(preconditions);
        self.executor.check_preconditions(preconditions).await
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.executor.finish() {
            let discarded = self.discard();
            tracing::debug!(
                revision = %self.executor.revision,
                discarded,
                "Rolled back transaction"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn write_relationships(&mut self, mutations: Vec<RelationshipUpdate>) -> Result<()> {
        self.executor.ensure_active()?;
        for mutation in &mutations {
            mutation.relationship.validate()?;
        }
        if !mutations.is_empty() {
            self.staged.push(StagedOp::Mutations(mutations));
        }
        Ok(())
    }

    async fn delete_relationships(&mut self, filter: RelationshipFilter) -> Result<()> {
        self.executor.ensure_active()?;
        filter.validate()?;
        self.staged.push(StagedOp::DeleteByFilter(filter));
        Ok(())
    }

    async fn commit(&mut self) -> Result<Revision> {
        self.executor.ensure_active()?;
        let inner = self.executor.inner.clone();

        let timer = OpTimer::new();
        let result = inner.commit(self.executor.revision, &self.preconditions, &self.staged).await;
        inner.metrics.record_commit(timer.elapsed(), result.is_err());

        self.executor.finish();
        self.discard();
        result
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.executor.finish() && !self.staged.is_empty() {
            tracing::debug!(
                revision = %self.executor.revision,
                discarded = self.staged.len(),
                "Transaction dropped without commit or rollback, discarding staged mutations"
            );
        }
    }
}
