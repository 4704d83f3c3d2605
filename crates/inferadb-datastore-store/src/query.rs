//! Query builders and the relationship iterator
//!
//! Builders are value types: every method consumes the builder and returns an
//! extended copy, and nothing touches the engine until `execute`.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use inferadb_datastore_types::{
    DatastoreError, ObjectFilter, Relationship, SubjectFilter, SubjectReference,
};

use crate::Result;

// ============================================================================
// Query Specifications
// ============================================================================

/// A query by the resource side of relationships
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardQuery {
    pub filter: ObjectFilter,
    pub subject_filter: Option<SubjectFilter>,
    pub usersets: Vec<SubjectReference>,
    pub limit: Option<u64>,
}

impl ForwardQuery {
    pub fn new(filter: ObjectFilter) -> Self {
        Self { filter, subject_filter: None, usersets: Vec::new(), limit: None }
    }

    /// A relationship matches when its resource matches the filter and its
    /// subject matches the subject filter OR appears among the usersets.
    /// Without either constraint every subject matches.
    pub fn matches(&self, relationship: &Relationship) -> bool {
        if !self.filter.matches_resource(relationship) {
            return false;
        }
        if self.subject_filter.is_none() && self.usersets.is_empty() {
            return true;
        }
        let subject = &relationship.subject;
        self.subject_filter.as_ref().is_some_and(|f| f.matches(subject))
            || self.usersets.iter().any(|u| u.same_subject(subject))
    }
}

/// Constrains a reverse query to relationships on `namespace#relation`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRelation {
    pub namespace: String,
    pub relation: String,
}

/// A query by the subject side of relationships
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseQuery {
    /// Applied to the subject of each relationship
    pub subject: ObjectFilter,
    pub object_relation: Option<ObjectRelation>,
    pub limit: Option<u64>,
}

impl ReverseQuery {
    pub fn new(subject: ObjectFilter) -> Self {
        Self { subject, object_relation: None, limit: None }
    }

    pub fn matches(&self, relationship: &Relationship) -> bool {
        self.subject.matches_subject(relationship)
            && self.object_relation.as_ref().is_none_or(|o| {
                relationship.resource_type == o.namespace && relationship.relation == o.relation
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySpec {
    Forward(ForwardQuery),
    Reverse(ReverseQuery),
}

impl QuerySpec {
    pub fn matches(&self, relationship: &Relationship) -> bool {
        match self {
            QuerySpec::Forward(q) => q.matches(relationship),
            QuerySpec::Reverse(q) => q.matches(relationship),
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            QuerySpec::Forward(q) => q.limit,
            QuerySpec::Reverse(q) => q.limit,
        }
    }
}

/// Runs a query against one transaction's snapshot
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: QuerySpec) -> Result<Box<dyn RelationshipIterator>>;
}

// ============================================================================
// Builders
// ============================================================================

/// Forward query builder returned by `ReadOnlyTransaction::query_relationships`
#[derive(Clone)]
pub struct RelationshipQuery {
    executor: Arc<dyn QueryExecutor>,
    spec: ForwardQuery,
}

impl RelationshipQuery {
    pub fn new(executor: Arc<dyn QueryExecutor>, filter: ObjectFilter) -> Self {
        Self { executor, spec: ForwardQuery::new(filter) }
    }

    /// Restrict subjects to those matching `filter` (or any added userset)
    pub fn with_subject_filter(mut self, filter: SubjectFilter) -> Self {
        self.spec.subject_filter = Some(filter);
        self
    }

    /// Add exact subjects to match; repeated calls accumulate
    pub fn with_usersets(mut self, usersets: impl IntoIterator<Item = SubjectReference>) -> Self {
        self.spec.usersets.extend(usersets);
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn spec(&self) -> &ForwardQuery {
        &self.spec
    }

    pub async fn execute(self) -> Result<Box<dyn RelationshipIterator>> {
        self.executor.execute(QuerySpec::Forward(self.spec)).await
    }
}

impl fmt::Debug for RelationshipQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipQuery").field("spec", &self.spec).finish_non_exhaustive()
    }
}

/// Reverse query builder returned by `ReadOnlyTransaction::reverse_query_relationships`
#[derive(Clone)]
pub struct ReverseRelationshipQuery {
    executor: Arc<dyn QueryExecutor>,
    spec: ReverseQuery,
}

impl ReverseRelationshipQuery {
    pub fn new(executor: Arc<dyn QueryExecutor>, subject: ObjectFilter) -> Self {
        Self { executor, spec: ReverseQuery::new(subject) }
    }

    /// Only return relationships on `namespace#relation`
    pub fn with_object_relation(
        mut self,
        namespace: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        self.spec.object_relation =
            Some(ObjectRelation { namespace: namespace.into(), relation: relation.into() });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn spec(&self) -> &ReverseQuery {
        &self.spec
    }

    pub async fn execute(self) -> Result<Box<dyn RelationshipIterator>> {
        self.executor.execute(QuerySpec::Reverse(self.spec)).await
    }
}

impl fmt::Debug for ReverseRelationshipQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverseRelationshipQuery").field("spec", &self.spec).finish_non_exhaustive()
    }
}

// ============================================================================
// Iterator
// ============================================================================

/// A closeable sequence of query results
///
/// `next` returning `None` means the sequence ended, not that it succeeded:
/// check [`err`](Self::err) afterwards. Always call [`close`](Self::close).
pub trait RelationshipIterator: Send {
    fn next(&mut self) -> Option<Relationship>;

    /// The terminal error, if iteration stopped because of one
    fn err(&self) -> Option<&DatastoreError>;

    /// Release resources. Idempotent; `next` returns `None` afterwards.
    fn close(&mut self);
}

/// Drain an iterator, surface its terminal error and close it
pub fn collect_relationships(
    mut iterator: Box<dyn RelationshipIterator>,
) -> Result<Vec<Relationship>> {
    let mut out = Vec::new();
    while let Some(relationship) = iterator.next() {
        out.push(relationship);
    }
    let result = match iterator.err() {
        Some(err) => Err(err.clone()),
        None => Ok(out),
    };
    iterator.close();
    result
}
