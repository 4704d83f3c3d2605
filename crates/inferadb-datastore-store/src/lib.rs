//! # InferaDB Datastore Store - Storage Contract
//!
//! The backend-agnostic contract every datastore engine implements: revision
//! acquisition, snapshot transactions with optimistic commits, query builders,
//! namespace management and the ordered change stream.
//!
//! Engines implement the capability traits ([`DataSource`], [`Namespaces`],
//! [`Relationships`]); callers use the [`Datastore`] facade that composes them.

#![deny(unsafe_code)]

use async_trait::async_trait;
pub use inferadb_datastore_types::{DatastoreError, DatastoreResult};
use inferadb_datastore_types::{
    NamespaceDefinition, ObjectFilter, Precondition, RelationshipFilter, RelationshipUpdate,
    Revision, Statistics,
};
use tokio::sync::watch;

pub mod facade;
pub mod metrics;
pub mod query;
pub mod watch_stream;

pub use facade::Datastore;
pub use metrics::{DatastoreMetrics, MetricsSnapshot, OpTimer};
pub use query::{
    ForwardQuery, ObjectRelation, QueryExecutor, QuerySpec, RelationshipIterator,
    RelationshipQuery, ReverseQuery, ReverseRelationshipQuery, collect_relationships,
};
pub use watch_stream::{WatchSubscription, cancellation, cancelled, is_cancelled};

type Result<T> = DatastoreResult<T>;

/// Lifecycle of the underlying engine
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Whether the engine can serve traffic; callers poll with backoff until true
    async fn is_ready(&self) -> Result<bool>;

    /// Approximate aggregate statistics
    async fn statistics(&self) -> Result<Statistics>;

    /// Release every engine resource. Afterwards every call, including calls on
    /// transactions and iterators obtained earlier, fails with `Closed`.
    async fn close(&self) -> Result<()>;

    /// Operation counters (optional, returns None if not supported)
    fn metrics(&self) -> Option<MetricsSnapshot> {
        None
    }
}

/// Versioned CRUD over namespace definitions
///
/// Each write and delete is its own committed transaction and returns the
/// revision at which it became visible.
#[async_trait]
pub trait Namespaces: Send + Sync {
    /// Create or replace a definition
    async fn write_namespace(&self, definition: NamespaceDefinition) -> Result<Revision>;

    /// Read a definition at head, with the revision it was last written at
    async fn read_namespace(&self, name: &str) -> Result<(NamespaceDefinition, Revision)>;

    /// Delete a definition and every relationship whose resource type it names
    async fn delete_namespace(&self, name: &str) -> Result<Revision>;

    /// All definitions at head, ordered by name
    async fn list_namespaces(&self) -> Result<Vec<NamespaceDefinition>>;
}

/// Revision acquisition, transactions and the change stream
#[async_trait]
pub trait Relationships: Send + Sync {
    /// A revision at which every commit that finished before this call is visible
    async fn head_revision(&self) -> Result<Revision>;

    /// A possibly older revision shared by all callers within the engine's
    /// quantization window. Never decreases across calls.
    async fn quantized_revision(&self) -> Result<Revision>;

    /// Open a read-only transaction pinned to `revision`
    async fn begin_read_only(&self, revision: Revision) -> Result<Box<dyn ReadOnlyTransaction>>;

    /// Open a read-write transaction pinned to `revision`
    async fn begin(&self, revision: Revision) -> Result<Box<dyn Transaction>>;

    /// Stream every committed relationship change with a revision strictly
    /// greater than `after_revision`, until `cancel` fires or is dropped
    fn watch(&self, after_revision: Revision, cancel: watch::Receiver<()>) -> WatchSubscription;
}

/// A snapshot-scoped read context
///
/// Every read observes exactly the data committed at or before [`revision`](Self::revision).
#[async_trait]
pub trait ReadOnlyTransaction: Send + Sync {
    fn revision(&self) -> Revision;

    /// Query relationships by their resource side
    fn query_relationships(&self, filter: ObjectFilter) -> RelationshipQuery;

    /// Query relationships by their subject side
    fn reverse_query_relationships(&self, filter: ObjectFilter) -> ReverseRelationshipQuery;

    /// Fail with `PreconditionFailed` naming the first violated precondition.
    /// Read-write transactions also re-validate them at commit.
    async fn check_preconditions(&mut self, preconditions: &[Precondition]) -> Result<()>;

    /// Release the snapshot. Idempotent, and a no-op after commit.
    async fn rollback(&mut self) -> Result<()>;
}

/// A read-write transaction with optimistic concurrency
///
/// Mutations are staged locally and applied atomically by [`commit`](Self::commit).
/// Dropping an open transaction discards everything it staged.
#[async_trait]
pub trait Transaction: ReadOnlyTransaction {
    /// Stage an ordered batch of mutations
    async fn write_relationships(&mut self, mutations: Vec<RelationshipUpdate>) -> Result<()>;

    /// Stage the deletion of every relationship matching `filter`
    async fn delete_relationships(&mut self, filter: RelationshipFilter) -> Result<()>;

    /// Validate preconditions, apply staged mutations and return the new revision
    async fn commit(&mut self) -> Result<Revision>;
}

/// An engine offering every capability
pub trait Engine: DataSource + Namespaces + Relationships {}

impl<T: DataSource + Namespaces + Relationships> Engine for T {}
