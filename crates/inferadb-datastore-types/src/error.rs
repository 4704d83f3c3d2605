//! Datastore error taxonomy
//!
//! Every engine maps its native failures onto [`DatastoreError`], so callers can
//! branch on the kind of failure without knowing which engine produced it.

use thiserror::Error;

use crate::{Precondition, Revision};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    /// The requested namespace or object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A staged precondition does not hold at the transaction's revision
    #[error("precondition failed: {0}")]
    PreconditionFailed(Box<Precondition>),

    /// A concurrent commit touched data this transaction read or wrote
    #[error("serialization conflict: {0}")]
    SerializationConflict(String),

    /// The revision is unset, in the future, or older than retained history
    #[error("invalid revision {revision}: {reason}")]
    InvalidRevision { revision: Revision, reason: String },

    /// The engine cannot service the request right now
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A watch subscription cannot continue
    #[error("watch disconnected: {0}")]
    WatchDisconnected(String),

    /// Malformed caller input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The datastore was closed or the transaction already finished
    #[error("closed: {0}")]
    Closed(String),
}

impl DatastoreError {
    pub fn invalid_revision(revision: Revision, reason: impl Into<String>) -> Self {
        Self::InvalidRevision { revision, reason: reason.into() }
    }

    pub fn precondition_failed(precondition: Precondition) -> Self {
        Self::PreconditionFailed(Box::new(precondition))
    }

    /// Whether retrying the same operation (after backoff, or after re-reading
    /// at a fresh revision) can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SerializationConflict(_)
                | Self::BackendUnavailable(_)
                | Self::WatchDisconnected(_)
        )
    }
}

pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;
