//! Versioned relationship state
//!
//! Every relationship key keeps the lifetimes it was live for, so any retained
//! revision can be read. All methods are synchronous and expect the caller to
//! hold the engine lock.

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    time::Duration,
};

use inferadb_datastore_store::{QuerySpec, ReverseQuery};
use inferadb_datastore_types::{
    DatastoreError, DatastoreResult, NamespaceDefinition, ObjectTypeStatistics, Precondition,
    Relationship, RelationshipFilter, RelationshipUpdate, Revision, RevisionChanges,
    SubjectReference, UpdateOperation,
};

/// The revision span a relationship was live for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lifetime {
    created_at: Revision,
    deleted_at: Option<Revision>,
}

impl Lifetime {
    fn is_visible_at(&self, revision: Revision) -> bool {
        self.created_at <= revision && self.deleted_at.is_none_or(|deleted| deleted > revision)
    }
}

#[derive(Debug, Clone)]
struct CommitRecord {
    /// Offset from engine start on the monotonic clock
    committed_at: Duration,
    changes: Vec<RelationshipUpdate>,
}

/// A staged write operation, kept in staging order
#[derive(Debug, Clone)]
pub(crate) enum StagedOp {
    Mutations(Vec<RelationshipUpdate>),
    DeleteByFilter(RelationshipFilter),
}

impl StagedOp {
    /// Whether a concurrent change to `relationship` invalidates this operation
    fn reads(&self, relationship: &Relationship) -> bool {
        match self {
            StagedOp::Mutations(mutations) => {
                mutations.iter().any(|m| &m.relationship == relationship)
            },
            StagedOp::DeleteByFilter(filter) => filter.matches(relationship),
        }
    }
}

/// The effect of a commit, computed before anything is applied
#[derive(Debug, Default)]
pub(crate) struct CommitPlan {
    changes: Vec<RelationshipUpdate>,
    /// Liveness of every touched key after the commit
    outcome: BTreeMap<Relationship, bool>,
}

impl CommitPlan {
    pub(crate) fn change_count(&self) -> usize {
        self.changes.len()
    }
}

/// History read by a watch producer in one pass
#[derive(Debug)]
pub(crate) struct ChangeBatch {
    pub(crate) records: Vec<RevisionChanges>,
    /// Highest revision examined, including revisions without relationship changes
    pub(crate) scanned: Revision,
}

#[derive(Debug)]
pub(crate) struct MemoryState {
    relationships: BTreeMap<Relationship, Vec<Lifetime>>,
    /// (subject type, subject id) → relationships naming that subject
    subject_index: BTreeMap<(String, String), BTreeSet<Relationship>>,
    namespaces: BTreeMap<String, (NamespaceDefinition, Revision)>,
    history: BTreeMap<Revision, CommitRecord>,
    head: Revision,
    oldest_retained: Revision,
}

impl MemoryState {
    /// State with one empty commit at revision 1, so head is never the sentinel
    pub(crate) fn new() -> Self {
        let initial = Revision::zero().next();
        let mut history = BTreeMap::new();
        history.insert(initial, CommitRecord { committed_at: Duration::ZERO, changes: Vec::new() });
        Self {
            relationships: BTreeMap::new(),
            subject_index: BTreeMap::new(),
            namespaces: BTreeMap::new(),
            history,
            head: initial,
            oldest_retained: initial,
        }
    }

    pub(crate) fn head(&self) -> Revision {
        self.head
    }

    pub(crate) fn oldest_retained(&self) -> Revision {
        self.oldest_retained
    }

    // =========================================================================
    // Revisions
    // =========================================================================

    /// Fail unless `revision` can be read
    pub(crate) fn check_readable(&self, revision: Revision) -> DatastoreResult<()> {
        if revision.is_none() {
            return Err(DatastoreError::invalid_revision(revision, "no revision given"));
        }
        if revision < self.oldest_retained {
            return Err(DatastoreError::invalid_revision(
                revision,
                format!("older than retained history (oldest is {})", self.oldest_retained),
            ));
        }
        if revision > self.head {
            return Err(DatastoreError::invalid_revision(
                revision,
                format!("newer than head revision {}", self.head),
            ));
        }
        Ok(())
    }

    /// Watches may also start at the revision just below the retention floor
    pub(crate) fn check_watch_start(&self, after: Revision) -> DatastoreResult<()> {
        if after.next() == self.oldest_retained && !after.is_none() {
            return Ok(());
        }
        self.check_readable(after)
    }

    /// Newest retained revision committed at or before `time`
    pub(crate) fn revision_at_or_before(&self, time: Duration) -> Revision {
        self.history
            .iter()
            .rev()
            .find(|(_, record)| record.committed_at <= time)
            .map(|(revision, _)| *revision)
            .unwrap_or(self.oldest_retained)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn is_visible(&self, relationship: &Relationship, revision: Revision) -> bool {
        self.relationships
            .get(relationship)
            .is_some_and(|lifetimes| lifetimes.iter().any(|l| l.is_visible_at(revision)))
    }

    fn is_live(&self, relationship: &Relationship) -> bool {
        self.is_visible(relationship, self.head)
    }

    /// Keys whose resource type (and id, if given) match, in key order
    fn resource_range<'a>(
        &'a self,
        resource_type: &'a str,
        resource_id: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        let lower = Relationship::new(
            resource_type,
            resource_id.unwrap_or_default(),
            "",
            SubjectReference::new("", ""),
        );
        self.relationships
            .range(lower..)
            .map(|(relationship, _)| relationship)
            .take_while(move |r| {
                r.resource_type == resource_type && resource_id.is_none_or(|id| r.resource_id == id)
            })
    }

    /// Keys whose subject type (and id, if given) match
    fn subject_range<'a>(
        &'a self,
        subject_type: &'a str,
        subject_id: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        let lower = (subject_type.to_string(), subject_id.unwrap_or_default().to_string());
        self.subject_index
            .range(lower..)
            .take_while(move |((t, id), _)| {
                t == subject_type && subject_id.is_none_or(|expected| id == expected)
            })
            .flat_map(|(_, relationships)| relationships.iter())
    }

    /// Evaluate a query at `revision`, honouring its limit
    pub(crate) fn scan(&self, query: &QuerySpec, revision: Revision) -> Vec<Relationship> {
        let limit = query.limit().map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let candidates: Box<dyn Iterator<Item = &Relationship> + '_> = match query {
            QuerySpec::Forward(q) => {
                let filter = &q.filter;
                let resource_id = filter.optional_resource_id.as_deref();
                Box::new(self.resource_range(&filter.resource_type, resource_id))
            },
            QuerySpec::Reverse(ReverseQuery { subject, .. }) => Box::new(
                self.subject_range(&subject.resource_type, subject.optional_resource_id.as_deref()),
            ),
        };
        candidates
            .filter(|r| query.matches(r) && self.is_visible(r, revision))
            .take(limit)
            .cloned()
            .collect()
    }

    fn any_match(&self, filter: &RelationshipFilter, revision: Revision) -> bool {
        self.resource_range(&filter.resource_type, filter.optional_resource_id.as_deref())
            .any(|r| filter.matches(r) && self.is_visible(r, revision))
    }

    /// The first precondition that does not hold at `revision`
    pub(crate) fn first_violation<'a>(
        &self,
        preconditions: &'a [Precondition],
        revision: Revision,
    ) -> Option<&'a Precondition> {
        preconditions.iter().find(|p| !p.holds(self.any_match(&p.filter, revision)))
    }

    pub(crate) fn changes_after(&self, after: Revision, limit: usize) -> ChangeBatch {
        let mut records = Vec::new();
        let mut scanned = after;
        for (revision, record) in
            self.history.range((Bound::Excluded(after), Bound::Unbounded)).take(limit.max(1))
        {
            scanned = *revision;
            if !record.changes.is_empty() {
                records.push(RevisionChanges {
                    revision: *revision,
                    changes: record.changes.clone(),
                });
            }
        }
        ChangeBatch { records, scanned }
    }

    // =========================================================================
    // Commits
    // =========================================================================

    /// The first revision after `pinned` whose changes intersect what the
    /// transaction read or wrote
    pub(crate) fn find_conflict(
        &self,
        pinned: Revision,
        preconditions: &[Precondition],
        staged: &[StagedOp],
    ) -> Option<Revision> {
        self.history.range((Bound::Excluded(pinned), Bound::Unbounded)).find_map(
            |(revision, record)| {
                record
                    .changes
                    .iter()
                    .any(|change| {
                        let relationship = &change.relationship;
                        preconditions.iter().any(|p| p.filter.matches(relationship))
                            || staged.iter().any(|op| op.reads(relationship))
                    })
                    .then_some(*revision)
            },
        )
    }

    /// Resolve staged operations against head without modifying anything
    pub(crate) fn plan(&self, staged: &[StagedOp]) -> DatastoreResult<CommitPlan> {
        let mut plan = CommitPlan::default();

        for op in staged {
            match op {
                StagedOp::Mutations(mutations) => {
                    for mutation in mutations {
                        let relationship = &mutation.relationship;
                        let live = self.live_in_plan(&plan, relationship);
                        match mutation.operation {
                            UpdateOperation::Touch => {
                                plan.outcome.insert(relationship.clone(), true);
                                plan.changes.push(mutation.clone());
                            },
                            UpdateOperation::Create => {
                                if live {
                                    return Err(DatastoreError::precondition_failed(
                                        Precondition::must_not_match(RelationshipFilter::exact(
                                            relationship,
                                        )),
                                    ));
                                }
                                plan.outcome.insert(relationship.clone(), true);
                                plan.changes.push(mutation.clone());
                            },
                            UpdateOperation::Delete => {
                                if live {
                                    plan.outcome.insert(relationship.clone(), false);
                                    plan.changes.push(mutation.clone());
                                }
                            },
                        }
                    }
                },
                StagedOp::DeleteByFilter(filter) => {
                    let resource_id = filter.optional_resource_id.as_deref();
                    let mut targets: BTreeSet<Relationship> = self
                        .resource_range(&filter.resource_type, resource_id)
                        .filter(|r| filter.matches(r) && self.is_live(r))
                        .cloned()
                        .collect();
                    targets.extend(
                        plan.outcome.iter().filter(|(r, live)| **live && filter.matches(r)).map(
                            |(r, _)| r.clone(),
                        ),
                    );
                    for relationship in targets {
                        if self.live_in_plan(&plan, &relationship) {
                            plan.outcome.insert(relationship.clone(), false);
                            plan.changes.push(RelationshipUpdate::delete(relationship));
                        }
                    }
                },
            }
        }

        Ok(plan)
    }

    fn live_in_plan(&self, plan: &CommitPlan, relationship: &Relationship) -> bool {
        plan.outcome.get(relationship).copied().unwrap_or_else(|| self.is_live(relationship))
    }

    /// Apply a plan as the commit of `revision`
    pub(crate) fn apply(&mut self, plan: CommitPlan, revision: Revision, committed_at: Duration) {
        for (relationship, live) in plan.outcome {
            match (self.is_live(&relationship), live) {
                (false, true) => self.insert_version(relationship, revision),
                (true, false) => self.end_version(&relationship, revision),
                _ => {},
            }
        }
        self.record_commit(revision, committed_at, plan.changes);
    }

    fn insert_version(&mut self, relationship: Relationship, revision: Revision) {
        let subject = &relationship.subject;
        self.subject_index
            .entry((subject.subject_type.clone(), subject.subject_id.clone()))
            .or_default()
            .insert(relationship.clone());
        self.relationships
            .entry(relationship)
            .or_default()
            .push(Lifetime { created_at: revision, deleted_at: None });
    }

    fn end_version(&mut self, relationship: &Relationship, revision: Revision) {
        if let Some(lifetime) = self
            .relationships
            .get_mut(relationship)
            .and_then(|lifetimes| lifetimes.iter_mut().find(|l| l.deleted_at.is_none()))
        {
            lifetime.deleted_at = Some(revision);
        }
    }

    fn record_commit(
        &mut self,
        revision: Revision,
        committed_at: Duration,
        changes: Vec<RelationshipUpdate>,
    ) {
        self.history.insert(revision, CommitRecord { committed_at, changes });
        self.head = revision;
    }

    // =========================================================================
    // Namespaces
    // =========================================================================

    pub(crate) fn namespace(&self, name: &str) -> Option<&(NamespaceDefinition, Revision)> {
        self.namespaces.get(name)
    }

    pub(crate) fn namespaces(&self) -> impl Iterator<Item = &NamespaceDefinition> {
        self.namespaces.values().map(|(definition, _)| definition)
    }

    pub(crate) fn write_namespace(
        &mut self,
        definition: NamespaceDefinition,
        revision: Revision,
        committed_at: Duration,
    ) {
        self.namespaces.insert(definition.name.clone(), (definition, revision));
        self.record_commit(revision, committed_at, Vec::new());
    }

    /// Remove a namespace and delete its relationships in the same revision.
    /// Returns how many relationships were deleted.
    pub(crate) fn delete_namespace(
        &mut self,
        name: &str,
        revision: Revision,
        committed_at: Duration,
    ) -> DatastoreResult<usize> {
        if !self.namespaces.contains_key(name) {
            return Err(DatastoreError::NotFound(format!("namespace '{name}'")));
        }
        let filter = RelationshipFilter::builder().resource_type(name).build();
        let plan = self.plan(&[StagedOp::DeleteByFilter(filter)])?;
        let deleted = plan.change_count();
        self.apply(plan, revision, committed_at);
        self.namespaces.remove(name);
        Ok(deleted)
    }

    // =========================================================================
    // Garbage Collection and Statistics
    // =========================================================================

    /// Drop everything only needed to read revisions older than `before`.
    /// Returns the number of relationship versions removed.
    pub(crate) fn collect_garbage(&mut self, before: Revision) -> usize {
        let before = before.min(self.head);
        if before <= self.oldest_retained {
            return 0;
        }

        let mut removed = 0;
        let mut emptied = Vec::new();
        for (relationship, lifetimes) in self.relationships.iter_mut() {
            let len = lifetimes.len();
            lifetimes.retain(|l| l.deleted_at.is_none_or(|deleted| deleted > before));
            removed += len - lifetimes.len();
            if lifetimes.is_empty() {
                emptied.push(relationship.clone());
            }
        }
        for relationship in emptied {
            self.relationships.remove(&relationship);
            let subject = &relationship.subject;
            let key = (subject.subject_type.clone(), subject.subject_id.clone());
            if let Some(set) = self.subject_index.get_mut(&key) {
                set.remove(&relationship);
                if set.is_empty() {
                    self.subject_index.remove(&key);
                }
            }
        }

        self.history = self.history.split_off(&before);
        self.oldest_retained = before;
        removed
    }

    pub(crate) fn live_relationship_count(&self) -> u64 {
        self.relationships.keys().filter(|r| self.is_live(r)).count() as u64
    }

    pub(crate) fn object_type_statistics(&self) -> Vec<ObjectTypeStatistics> {
        self.namespaces()
            .map(|definition| ObjectTypeStatistics {
                object_type: definition.name.clone(),
                relation_count: definition.relation_count(),
                permission_count: definition.permission_count(),
                estimated_relationship_count: self
                    .resource_range(&definition.name, None)
                    .filter(|r| self.is_live(r))
                    .count() as u64,
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use inferadb_datastore_store::ForwardQuery;
    use inferadb_datastore_test_fixtures::{create, delete, rel, touch};
    use inferadb_datastore_types::ObjectFilter;

    use super::*;

    fn commit(state: &mut MemoryState, staged: &[StagedOp]) -> Revision {
        let plan = state.plan(staged).unwrap();
        let revision = state.head().next();
        state.apply(plan, revision, Duration::ZERO);
        revision
    }

    fn mutate(state: &mut MemoryState, update: RelationshipUpdate) -> Revision {
        commit(state, &[StagedOp::Mutations(vec![update])])
    }

    fn documents(state: &MemoryState, revision: Revision) -> Vec<String> {
        let query = QuerySpec::Forward(ForwardQuery::new(ObjectFilter::of_type("document")));
        state.scan(&query, revision).iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_initial_state() {
        let state = MemoryState::new();
        assert_eq!(state.head(), Revision(1));
        assert_eq!(state.oldest_retained(), Revision(1));
        assert!(state.check_readable(Revision(1)).is_ok());
        assert!(state.check_readable(Revision::zero()).is_err());
        assert!(state.check_readable(Revision(2)).is_err());
    }

    #[test]
    fn test_versions_are_readable_at_every_retained_revision() {
        let mut state = MemoryState::new();
        let r2 = mutate(&mut state, touch("document:a#viewer@user:alice"));
        let r3 = mutate(&mut state, delete("document:a#viewer@user:alice"));
        let r4 = mutate(&mut state, touch("document:a#viewer@user:alice"));

        assert!(documents(&state, Revision(1)).is_empty());
        assert_eq!(documents(&state, r2), vec!["document:a#viewer@user:alice"]);
        assert!(documents(&state, r3).is_empty());
        assert_eq!(documents(&state, r4), vec!["document:a#viewer@user:alice"]);
    }

    #[test]
    fn test_create_of_live_relationship_fails_plan() {
        let mut state = MemoryState::new();
        mutate(&mut state, touch("document:a#viewer@user:alice"));
        let err = state
            .plan(&[StagedOp::Mutations(vec![create("document:a#viewer@user:alice")])])
            .unwrap_err();
        assert!(matches!(err, DatastoreError::PreconditionFailed(_)));
    }

    #[test]
    fn test_plan_respects_staging_order() {
        let state = MemoryState::new();
        let plan = state
            .plan(&[
                StagedOp::Mutations(vec![create("document:a#viewer@user:alice")]),
                StagedOp::DeleteByFilter(
                    RelationshipFilter::builder().resource_type("document").build(),
                ),
                StagedOp::Mutations(vec![create("document:a#viewer@user:alice")]),
            ])
            .unwrap();
        let ops: Vec<_> = plan.changes.iter().map(|c| c.operation).collect();
        assert_eq!(
            ops,
            vec![UpdateOperation::Create, UpdateOperation::Delete, UpdateOperation::Create]
        );
        assert_eq!(plan.outcome.get(&rel("document:a#viewer@user:alice")), Some(&true));
    }

    #[test]
    fn test_delete_of_absent_relationship_is_noop() {
        let state = MemoryState::new();
        let plan = state
            .plan(&[StagedOp::Mutations(vec![delete("document:a#viewer@user:alice")])])
            .unwrap();
        assert_eq!(plan.change_count(), 0);
    }

    #[test]
    fn test_touch_of_existing_is_recorded_but_keeps_version() {
        let mut state = MemoryState::new();
        let r2 = mutate(&mut state, touch("document:a#viewer@user:alice"));
        let r3 = mutate(&mut state, touch("document:a#viewer@user:alice"));
        assert_eq!(state.changes_after(r2, 10).records[0].revision, r3);
        let lifetimes = state.relationships.get(&rel("document:a#viewer@user:alice")).unwrap();
        assert_eq!(lifetimes.len(), 1);
        assert_eq!(lifetimes[0].created_at, r2);
    }

    #[test]
    fn test_conflict_detection_against_read_set() {
        let mut state = MemoryState::new();
        let pinned = state.head();
        mutate(&mut state, touch("document:a#viewer@user:alice"));

        let unrelated = [StagedOp::Mutations(vec![touch("folder:x#viewer@user:bob")])];
        assert_eq!(state.find_conflict(pinned, &[], &unrelated), None);

        let overlapping = [StagedOp::DeleteByFilter(
            RelationshipFilter::builder().resource_type("document").build(),
        )];
        assert_eq!(state.find_conflict(pinned, &[], &overlapping), Some(Revision(2)));

        let precondition = Precondition::must_not_match(RelationshipFilter::exact(&rel(
            "document:a#viewer@user:alice",
        )));
        assert_eq!(state.find_conflict(pinned, &[precondition], &[]), Some(Revision(2)));
    }

    #[test]
    fn test_reverse_scan_uses_subject_side() {
        let mut state = MemoryState::new();
        let revision = commit(
            &mut state,
            &[StagedOp::Mutations(vec![
                touch("document:a#viewer@user:alice"),
                touch("folder:x#viewer@user:alice"),
                touch("document:b#viewer@user:bob"),
            ])],
        );
        let query = QuerySpec::Reverse(ReverseQuery::new(
            ObjectFilter::builder().resource_type("user").optional_resource_id("alice").build(),
        ));
        assert_eq!(state.scan(&query, revision).len(), 2);
    }

    #[test]
    fn test_namespace_delete_cascades_in_one_revision() {
        let mut state = MemoryState::new();
        state.write_namespace(NamespaceDefinition::new("document"), Revision(2), Duration::ZERO);
        commit(
            &mut state,
            &[StagedOp::Mutations(vec![
                touch("document:a#viewer@user:alice"),
                touch("folder:x#viewer@user:alice"),
            ])],
        );
        let deleted = state.delete_namespace("document", Revision(4), Duration::ZERO).unwrap();
        assert_eq!(deleted, 1);
        assert!(state.namespace("document").is_none());
        assert!(documents(&state, Revision(4)).is_empty());
        assert_eq!(documents(&state, Revision(3)).len(), 1);
        assert_eq!(state.live_relationship_count(), 1);
        assert!(matches!(
            state.delete_namespace("document", Revision(5), Duration::ZERO),
            Err(DatastoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_garbage_collection_raises_retention_floor() {
        let mut state = MemoryState::new();
        mutate(&mut state, touch("document:a#viewer@user:alice"));
        let r3 = mutate(&mut state, delete("document:a#viewer@user:alice"));
        let r4 = mutate(&mut state, touch("document:b#viewer@user:bob"));

        let removed = state.collect_garbage(r3);
        assert_eq!(removed, 1);
        assert_eq!(state.oldest_retained(), r3);
        assert!(state.check_readable(Revision(2)).is_err());
        assert!(state.check_watch_start(Revision(2)).is_ok());
        assert!(state.check_watch_start(Revision(1)).is_err());
        assert!(state.check_watch_start(r4.next()).is_err());
        assert_eq!(documents(&state, r4), vec!["document:b#viewer@user:bob"]);
        assert!(!state.subject_index.contains_key(&("user".to_string(), "alice".to_string())));
        assert_eq!(state.changes_after(r3, 10).records.len(), 1);
    }

    #[test]
    fn test_changes_after_skips_empty_commits() {
        let mut state = MemoryState::new();
        state.write_namespace(NamespaceDefinition::new("document"), Revision(2), Duration::ZERO);
        let r3 = mutate(&mut state, touch("document:a#viewer@user:alice"));
        let batch = state.changes_after(Revision(1), 10);
        assert_eq!(batch.scanned, r3);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].revision, r3);
    }

    #[test]
    fn test_revision_at_or_before() {
        let mut state = MemoryState::new();
        state.write_namespace(NamespaceDefinition::new("a"), Revision(2), Duration::from_secs(5));
        state.write_namespace(NamespaceDefinition::new("b"), Revision(3), Duration::from_secs(10));
        assert_eq!(state.revision_at_or_before(Duration::from_secs(4)), Revision(1));
        assert_eq!(state.revision_at_or_before(Duration::from_secs(5)), Revision(2));
        assert_eq!(state.revision_at_or_before(Duration::from_secs(60)), Revision(3));
    }
}
