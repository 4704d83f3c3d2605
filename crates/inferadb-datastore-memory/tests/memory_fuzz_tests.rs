//! Property tests for the in-memory engine
//!
//! Random commit sequences are checked against a plain set model: every
//! retained revision must read back exactly the model state at that revision,
//! and a watch replay from the start must rebuild the final state.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{collections::BTreeSet, time::Duration};

use inferadb_datastore_memory::{MemoryDatastore, MemoryEngineOptions};
use inferadb_datastore_store::{Relationships, cancellation, collect_relationships};
use inferadb_datastore_test_fixtures::{arb_relationship, proptest_config};
use inferadb_datastore_types::{
    ObjectFilter, Relationship, RelationshipUpdate, Revision, UpdateOperation,
};
use proptest::{prelude::*, test_runner::TestRunner};

fn arb_update() -> impl Strategy<Value = RelationshipUpdate> {
    (any::<bool>(), arb_relationship()).prop_map(|(keep, relationship)| {
        if keep {
            RelationshipUpdate::touch(relationship)
        } else {
            RelationshipUpdate::delete(relationship)
        }
    })
}

fn arb_batches() -> impl Strategy<Value = Vec<Vec<RelationshipUpdate>>> {
    prop::collection::vec(prop::collection::vec(arb_update(), 1..6), 1..12)
}

fn apply_to_model(model: &mut BTreeSet<Relationship>, batch: &[RelationshipUpdate]) {
    for update in batch {
        match update.operation {
            UpdateOperation::Touch | UpdateOperation::Create => {
                model.insert(update.relationship.clone());
            },
            UpdateOperation::Delete => {
                model.remove(&update.relationship);
            },
        }
    }
}

async fn read_all(ds: &MemoryDatastore, revision: Revision) -> BTreeSet<Relationship> {
    let tx = ds.begin_read_only(revision).await.unwrap();
    let mut all = BTreeSet::new();
    for resource_type in ["document", "folder"] {
        let iterator =
            tx.query_relationships(ObjectFilter::of_type(resource_type)).execute().await.unwrap();
        all.extend(collect_relationships(iterator).unwrap());
    }
    all
}

fn engine() -> MemoryDatastore {
    MemoryDatastore::new(
        MemoryEngineOptions::builder()
            .quantization_interval(Duration::ZERO)
            .gc_window(Duration::ZERO)
            .build(),
    )
}

#[test]
fn test_every_revision_matches_model() {
    let mut runner = TestRunner::new(proptest_config());
    runner
        .run(&arb_batches(), |batches| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let ds = engine();
                let mut model = BTreeSet::new();
                let mut snapshots = Vec::new();

                for batch in &batches {
                    let head = ds.head_revision().await.unwrap();
                    let mut tx = ds.begin(head).await.unwrap();
                    tx.write_relationships(batch.clone()).await.unwrap();
                    let revision = tx.commit().await.unwrap();
                    assert!(revision > head);

                    apply_to_model(&mut model, batch);
                    snapshots.push((revision, model.clone()));
                }

                for (revision, expected) in snapshots {
                    assert_eq!(read_all(&ds, revision).await, expected);
                }
            });
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_watch_replay_rebuilds_final_state() {
    let mut runner = TestRunner::new(proptest_config());
    runner
        .run(&arb_batches(), |batches| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let ds = engine();
                let start = ds.head_revision().await.unwrap();

                let mut model = BTreeSet::new();
                for batch in &batches {
                    let head = ds.head_revision().await.unwrap();
                    let mut tx = ds.begin(head).await.unwrap();
                    tx.write_relationships(batch.clone()).await.unwrap();
                    tx.commit().await.unwrap();
                    apply_to_model(&mut model, batch);
                }
                // Revisions without effective changes are not streamed, so end on
                // a commit that always produces one
                let sentinel: Relationship = "folder:end#viewer@user:zed".parse().unwrap();
                let head = ds.head_revision().await.unwrap();
                let mut tx = ds.begin(head).await.unwrap();
                tx.write_relationships(vec![RelationshipUpdate::touch(sentinel.clone())])
                    .await
                    .unwrap();
                let end = tx.commit().await.unwrap();

                let (_cancel_tx, cancel) = cancellation();
                let mut subscription = ds.watch(start, cancel);
                let mut replayed = BTreeSet::new();
                let mut last = start;
                while last < end {
                    let changes = tokio::time::timeout(Duration::from_secs(5), subscription.next())
                        .await
                        .unwrap()
                        .unwrap();
                    assert!(changes.revision > last);
                    last = changes.revision;
                    apply_to_model(&mut replayed, &changes.changes);
                }
                assert_eq!(last, end);
                replayed.remove(&sentinel);
                assert_eq!(replayed, model);
            });
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_concurrent_commits_at_one_snapshot_serialize() {
    let mut runner = TestRunner::new(proptest_config());
    runner
        .run(&(arb_update(), arb_update()), |(first, second)| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let ds = engine();
                let pinned = ds.head_revision().await.unwrap();
                let mut a = ds.begin(pinned).await.unwrap();
                let mut b = ds.begin(pinned).await.unwrap();
                a.write_relationships(vec![first.clone()]).await.unwrap();
                b.write_relationships(vec![second.clone()]).await.unwrap();

                a.commit().await.unwrap();
                let outcome = b.commit().await;
                // Deleting an absent relationship changes nothing and cannot conflict
                let effective = matches!(first.operation, UpdateOperation::Touch);
                if effective && first.relationship == second.relationship {
                    assert!(outcome.unwrap_err().is_retryable());
                } else {
                    outcome.unwrap();
                }
            });
            Ok(())
        })
        .unwrap();
}
