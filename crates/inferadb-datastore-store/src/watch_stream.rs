//! Change stream subscription
//!
//! A subscription owns two receivers: a bounded data channel carrying one
//! [`RevisionChanges`] per committed revision in strictly increasing order,
//! and a single-value error channel that receives at most one terminal error.
//! Cancellation is a separate `tokio::sync::watch` channel owned by the caller.

use inferadb_datastore_types::{DatastoreError, RevisionChanges};
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug)]
pub struct WatchSubscription {
    pub changes: mpsc::Receiver<RevisionChanges>,
    pub errors: oneshot::Receiver<DatastoreError>,
}

impl WatchSubscription {
    /// A subscription that terminated before producing anything
    pub fn failed(error: DatastoreError) -> Self {
        let (_, changes) = mpsc::channel(1);
        let (error_tx, errors) = oneshot::channel();
        let _ = error_tx.send(error);
        Self { changes, errors }
    }

    /// The next committed revision, or `None` once the stream has terminated
    pub async fn next(&mut self) -> Option<RevisionChanges> {
        self.changes.recv().await
    }

    /// The terminal error, if the stream ended because of one.
    /// Call after [`next`](Self::next) returned `None`.
    pub async fn terminal_error(self) -> Option<DatastoreError> {
        self.errors.await.ok()
    }
}

/// A cancellation token pair: send on (or drop) the sender to stop a watch
pub fn cancellation() -> (watch::Sender<()>, watch::Receiver<()>) {
    watch::channel(())
}

/// Whether the caller already signalled cancellation
pub fn is_cancelled(cancel: &watch::Receiver<()>) -> bool {
    !matches!(cancel.has_changed(), Ok(false))
}

/// Resolves once the caller signals cancellation or drops the sender
pub async fn cancelled(cancel: &mut watch::Receiver<()>) {
    let _ = cancel.changed().await;
}
