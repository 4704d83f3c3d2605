//! # InferaDB Datastore
//!
//! Storage abstraction for relationship-based authorization data: revisions,
//! snapshot transactions with optimistic commit, forward and reverse
//! relationship queries, namespace definitions and a change stream.
//!
//! [`new_datastore`] builds an engine from [`DatastoreOptions`], waits until it
//! is ready, runs the bootstrap loader and returns the [`Datastore`] facade.
//!
//! ```no_run
//! use inferadb_datastore::{DatastoreOptions, new_datastore};
//!
//! # async fn run() -> Result<(), inferadb_datastore::StartupError> {
//! let datastore = new_datastore(
//!     DatastoreOptions::builder()
//!         .bootstrap_contents([("schema".to_string(), b"definition user {}".to_vec())].into())
//!         .build(),
//! )
//! .await?;
//! let head = datastore.head_revision().await?;
//! # let _ = head;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod factory;

pub use factory::{DatastoreOptions, EngineKind, StartupError, new_datastore};
pub use inferadb_datastore_bootstrap::{BootstrapSource, BootstrapSummary};
pub use inferadb_datastore_memory::{MemoryDatastore, MemoryEngineOptions};
pub use inferadb_datastore_store::{
    DataSource, Datastore, Namespaces, ReadOnlyTransaction, RelationshipIterator,
    RelationshipQuery, Relationships, ReverseRelationshipQuery, Transaction, WatchSubscription,
    cancellation, collect_relationships,
};
pub use inferadb_datastore_types::*;
