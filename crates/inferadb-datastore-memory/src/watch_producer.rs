//! Change stream producer
//!
//! One task per subscription. It replays retained history after the start
//! revision, then waits on the head channel for new commits. Revisions are
//! delivered in order, each exactly once; revisions that changed no
//! relationships are skipped.

use std::sync::Arc;

use inferadb_datastore_store::{WatchSubscription, cancelled, is_cancelled};
use inferadb_datastore_types::{DatastoreError, Revision, RevisionChanges};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
};

use crate::{Inner, Result};

/// Start a producer task for changes committed after `after`
pub(crate) fn spawn(
    inner: Arc<Inner>,
    after: Revision,
    cancel: watch::Receiver<()>,
) -> WatchSubscription {
    let Ok(handle) = Handle::try_current() else {
        return WatchSubscription::failed(DatastoreError::BackendUnavailable(
            "watch requires a running tokio runtime".to_string(),
        ));
    };

    let (changes_tx, changes) = mpsc::channel(inner.options.watch_buffer_length.max(1));
    let (error_tx, errors) = oneshot::channel();

    inner.metrics.record_watch_started();
    handle.spawn(async move {
        let outcome = produce(&inner, after, cancel, &changes_tx).await;
        inner.metrics.record_watch_stopped();
        match outcome {
            Ok(()) => tracing::debug!(after = %after, "Watch stopped"),
            Err(e) => {
                tracing::warn!(after = %after, error = %e, "Watch terminated");
                let _ = error_tx.send(e);
            },
        }
        // Dropping the sender closes the data channel
    });

    WatchSubscription { changes, errors }
}

async fn produce(
    inner: &Inner,
    after: Revision,
    mut cancel: watch::Receiver<()>,
    changes_tx: &mpsc::Sender<RevisionChanges>,
) -> Result<()> {
    let mut head_rx = inner.head_tx.subscribe();
    {
        inner.ensure_open()?;
        inner.state.read().await.check_watch_start(after)?;
    }

    let batch_size = inner.options.watch_batch_size;
    let mut last = after;
    loop {
        if is_cancelled(&cancel) {
            return Ok(());
        }
        let _ = head_rx.borrow_and_update();

        let batch = {
            let state = inner.state.read().await;
            if inner.is_closed() {
                return Err(DatastoreError::WatchDisconnected("datastore closed".to_string()));
            }
            if last.next() < state.oldest_retained() {
                return Err(DatastoreError::WatchDisconnected(format!(
                    "history after revision {last} was garbage collected"
                )));
            }
            state.changes_after(last, batch_size)
        };

        if batch.scanned == last {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Ok(()),
                changed = head_rx.changed() => {
                    if changed.is_err() {
                        return Err(DatastoreError::WatchDisconnected(
                            "datastore dropped".to_string(),
                        ));
                    }
                },
            }
            continue;
        }

        for record in batch.records {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Ok(()),
                sent = changes_tx.send(record) => {
                    if sent.is_err() {
                        // Subscriber went away
                        return Ok(());
                    }
                    inner.metrics.record_watch_delivery();
                },
            }
        }
        last = batch.scanned;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use inferadb_datastore_store::{DataSource, Relationships, cancellation};
    use inferadb_datastore_test_fixtures::touch;
    use tokio::time::timeout;

    use crate::{MemoryDatastore, MemoryEngineOptions};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn write(ds: &MemoryDatastore, relationship: &str) -> Revision {
        let head = ds.head_revision().await.unwrap();
        let mut tx = ds.begin(head).await.unwrap();
        tx.write_relationships(vec![touch(relationship)]).await.unwrap();
        tx.commit().await.unwrap()
    }

    #[tokio::test]
    async fn test_replays_history_then_follows_head() {
        let ds = MemoryDatastore::default();
        let start = ds.head_revision().await.unwrap();
        let r1 = write(&ds, "document:a#viewer@user:alice").await;

        let (_cancel_tx, cancel) = cancellation();
        let mut subscription = ds.watch(start, cancel);
        let first = timeout(WAIT, subscription.next()).await.unwrap().unwrap();
        assert_eq!(first.revision, r1);

        let r2 = write(&ds, "document:b#viewer@user:bob").await;
        let second = timeout(WAIT, subscription.next()).await.unwrap().unwrap();
        assert_eq!(second.revision, r2);
        assert_eq!(second.changes, vec![touch("document:b#viewer@user:bob")]);
    }

    #[tokio::test]
    async fn test_small_batches_deliver_every_revision() {
        let ds = MemoryDatastore::new(MemoryEngineOptions::builder().watch_batch_size(1).build());
        let start = ds.head_revision().await.unwrap();
        let mut expected = Vec::new();
        for id in ["a", "b", "c", "d"] {
            expected.push(write(&ds, &format!("document:{id}#viewer@user:alice")).await);
        }

        let (_cancel_tx, cancel) = cancellation();
        let mut subscription = ds.watch(start, cancel);
        let mut seen = Vec::new();
        while seen.len() < expected.len() {
            seen.push(timeout(WAIT, subscription.next()).await.unwrap().unwrap().revision);
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_unread_subscriber_does_not_block_commits() {
        let ds =
            MemoryDatastore::new(MemoryEngineOptions::builder().watch_buffer_length(1).build());
        let start = ds.head_revision().await.unwrap();
        let (_cancel_tx, cancel) = cancellation();
        let mut subscription = ds.watch(start, cancel);

        let commits = async {
            let mut revisions = Vec::new();
            for i in 0..50 {
                revisions.push(write(&ds, &format!("document:d{i}#viewer@user:alice")).await);
            }
            revisions
        };
        let expected = timeout(WAIT, commits).await.unwrap();

        let mut seen = Vec::new();
        while seen.len() < expected.len() {
            seen.push(timeout(WAIT, subscription.next()).await.unwrap().unwrap().revision);
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_cancel_closes_stream_without_error() {
        let ds = MemoryDatastore::default();
        let start = ds.head_revision().await.unwrap();
        let (cancel_tx, cancel) = cancellation();
        let mut subscription = ds.watch(start, cancel);

        cancel_tx.send(()).unwrap();
        assert!(timeout(WAIT, subscription.next()).await.unwrap().is_none());
        assert!(subscription.terminal_error().await.is_none());
        assert_eq!(ds.metrics().unwrap().watch_active, 0);
    }

    #[tokio::test]
    async fn test_start_newer_than_head_is_invalid() {
        let ds = MemoryDatastore::default();
        let head = ds.head_revision().await.unwrap();
        let (_cancel_tx, cancel) = cancellation();
        let mut subscription = ds.watch(head.next(), cancel);

        assert!(timeout(WAIT, subscription.next()).await.unwrap().is_none());
        assert!(matches!(
            subscription.terminal_error().await,
            Some(DatastoreError::InvalidRevision { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_disconnects_watchers() {
        let ds = MemoryDatastore::default();
        let start = ds.head_revision().await.unwrap();
        let (_cancel_tx, cancel) = cancellation();
        let mut subscription = ds.watch(start, cancel);

        ds.close().await.unwrap();
        assert!(timeout(WAIT, subscription.next()).await.unwrap().is_none());
        assert!(matches!(
            subscription.terminal_error().await,
            Some(DatastoreError::WatchDisconnected(_))
        ));
    }

    #[test]
    fn test_watch_outside_runtime_fails() {
        let ds = MemoryDatastore::default();
        let (_cancel_tx, cancel) = cancellation();
        let subscription = ds.watch(Revision(1), cancel);
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let error = runtime.block_on(subscription.terminal_error());
        assert!(matches!(error, Some(DatastoreError::BackendUnavailable(_))));
    }
}
