//! # InferaDB Datastore Types
//!
//! Shared type definitions for the InferaDB datastore contract.
//!
//! Every engine, the bootstrap loader and the telemetry collector speak in these
//! types, so this crate has no dependency on any engine.

#![deny(unsafe_code)]

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod error;
pub mod namespace;

pub use error::{DatastoreError, DatastoreResult};
pub use namespace::{
    AllowedSubject, NamespaceDefinition, RelationDefinition, RelationKind, UsersetRewrite,
};

/// The reserved relation meaning "the subject itself"
pub const ELLIPSIS: &str = "...";

/// Subject id granting a relation to every object of the subject type
pub const WILDCARD: &str = "*";

// ============================================================================
// Revisions
// ============================================================================

/// A point in committed history
///
/// Revisions assigned to commits on one datastore are strictly increasing.
/// `Revision(0)` is the "no revision" sentinel and is never assigned to a commit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    pub const NONE: Revision = Revision(0);

    pub fn zero() -> Self {
        Self::NONE
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Revision {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Revision)
            .map_err(|e| DatastoreError::InvalidArgument(format!("invalid revision '{s}': {e}")))
    }
}

// ============================================================================
// Relationships
// ============================================================================

/// The subject side of a relationship: `type:id` or `type:id#relation`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectReference {
    pub subject_type: String,
    pub subject_id: String,
    /// `None` is equivalent to [`ELLIPSIS`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_relation: Option<String>,
}

impl SubjectReference {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            optional_relation: None,
        }
    }

    /// A userset subject such as `group:eng#member`
    pub fn userset(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self::new(subject_type, subject_id).with_relation(relation)
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        self.optional_relation = if relation == ELLIPSIS { None } else { Some(relation) };
        self
    }

    pub fn relation_or_ellipsis(&self) -> &str {
        self.optional_relation.as_deref().unwrap_or(ELLIPSIS)
    }

    pub fn is_wildcard(&self) -> bool {
        self.subject_id == WILDCARD
    }

    /// Equality that treats an explicit `...` relation the same as an absent one
    pub fn same_subject(&self, other: &SubjectReference) -> bool {
        self.subject_type == other.subject_type
            && self.subject_id == other.subject_id
            && self.relation_or_ellipsis() == other.relation_or_ellipsis()
    }
}

impl fmt::Display for SubjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)?;
        if let Some(relation) = &self.optional_relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

/// A relationship between a resource and a subject
///
/// Ordering sorts by resource type first, which engines use for range scans.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub resource_type: String,
    pub resource_id: String,
    pub relation: String,
    pub subject: SubjectReference,
}

impl Relationship {
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        relation: impl Into<String>,
        subject: SubjectReference,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            relation: relation.into(),
            subject,
        }
    }

    /// Reject relationships that no engine could store faithfully
    pub fn validate(&self) -> DatastoreResult<()> {
        if !is_valid_namespace_name(&self.resource_type) {
            return Err(invalid(self, "resource type"));
        }
        if !is_valid_object_id(&self.resource_id) {
            return Err(invalid(self, "resource id"));
        }
        if !is_valid_identifier(&self.relation) {
            return Err(invalid(self, "relation"));
        }
        if !is_valid_namespace_name(&self.subject.subject_type) {
            return Err(invalid(self, "subject type"));
        }
        if !self.subject.is_wildcard() && !is_valid_object_id(&self.subject.subject_id) {
            return Err(invalid(self, "subject id"));
        }
        match self.subject.optional_relation.as_deref() {
            None | Some(ELLIPSIS) => {},
            Some(_) if self.subject.is_wildcard() => {
                return Err(invalid(self, "wildcard subject relation"));
            },
            Some(relation) if !is_valid_identifier(relation) => {
                return Err(invalid(self, "subject relation"));
            },
            Some(_) => {},
        }
        Ok(())
    }
}

fn invalid(relationship: &Relationship, field: &str) -> DatastoreError {
    DatastoreError::InvalidArgument(format!("relationship '{relationship}' has an invalid {field}"))
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}@{}", self.resource_type, self.resource_id, self.relation, self.subject)
    }
}

impl FromStr for Relationship {
    type Err = DatastoreError;

    /// Parses `document:readme#viewer@user:alice` or `document:readme#viewer@group:eng#member`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DatastoreError::InvalidArgument(format!("malformed relationship '{s}'"));
        let s = s.trim();
        let (resource, subject) = s.split_once('@').ok_or_else(malformed)?;
        let (object, relation) = resource.split_once('#').ok_or_else(malformed)?;
        let (resource_type, resource_id) = object.split_once(':').ok_or_else(malformed)?;
        let (subject_object, subject_relation) = match subject.split_once('#') {
            Some((object, relation)) => (object, Some(relation)),
            None => (subject, None),
        };
        let (subject_type, subject_id) = subject_object.split_once(':').ok_or_else(malformed)?;

        let mut subject_ref = SubjectReference::new(subject_type, subject_id);
        if let Some(relation) = subject_relation {
            subject_ref = subject_ref.with_relation(relation);
        }
        let relationship = Relationship::new(resource_type, resource_id, relation, subject_ref);
        relationship.validate()?;
        Ok(relationship)
    }
}

/// Lowercase identifier: `[a-z][a-z0-9_]{0,63}`
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {},
        _ => return false,
    }
    s.len() <= 64 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Namespace name, optionally carrying one `prefix/` segment
pub fn is_valid_namespace_name(s: &str) -> bool {
    match s.split_once('/') {
        Some((prefix, name)) => is_valid_identifier(prefix) && is_valid_identifier(name),
        None => is_valid_identifier(s),
    }
}

/// Object id: one or more of `[a-zA-Z0-9/_|\-=+]`
pub fn is_valid_object_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 1024
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "/_|-=+".contains(c))
}

// ============================================================================
// Mutations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOperation {
    /// Insert, or keep if already present
    Touch,
    /// Insert; fails the commit if already present
    Create,
    /// Remove if present
    Delete,
}

/// One staged mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    pub operation: UpdateOperation,
    pub relationship: Relationship,
}

impl RelationshipUpdate {
    pub fn touch(relationship: Relationship) -> Self {
        Self { operation: UpdateOperation::Touch, relationship }
    }

    pub fn create(relationship: Relationship) -> Self {
        Self { operation: UpdateOperation::Create, relationship }
    }

    pub fn delete(relationship: Relationship) -> Self {
        Self { operation: UpdateOperation::Delete, relationship }
    }
}

/// One committed revision and the relationship mutations applied at it,
/// in application order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionChanges {
    pub revision: Revision,
    pub changes: Vec<RelationshipUpdate>,
}

// ============================================================================
// Filters
// ============================================================================

/// Selects objects by type, optional id and optional relation
///
/// Forward queries apply it to the resource side of a relationship, reverse
/// queries to the subject side. An unset optional field matches any value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct ObjectFilter {
    pub resource_type: String,
    pub optional_resource_id: Option<String>,
    pub optional_resource_relation: Option<String>,
}

impl ObjectFilter {
    pub fn of_type(resource_type: impl Into<String>) -> Self {
        Self::builder().resource_type(resource_type).build()
    }

    pub fn matches_resource(&self, relationship: &Relationship) -> bool {
        relationship.resource_type == self.resource_type
            && matches_optional(&self.optional_resource_id, &relationship.resource_id)
            && matches_optional(&self.optional_resource_relation, &relationship.relation)
    }

    pub fn matches_subject(&self, relationship: &Relationship) -> bool {
        let subject = &relationship.subject;
        subject.subject_type == self.resource_type
            && matches_optional(&self.optional_resource_id, &subject.subject_id)
            && matches_optional(&self.optional_resource_relation, subject.relation_or_ellipsis())
    }
}

/// Selects subjects by type, optional id and optional relation
///
/// A relation of `...` selects only direct subjects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct SubjectFilter {
    pub subject_type: String,
    pub optional_subject_id: Option<String>,
    pub optional_relation: Option<String>,
}

impl SubjectFilter {
    pub fn matches(&self, subject: &SubjectReference) -> bool {
        subject.subject_type == self.subject_type
            && matches_optional(&self.optional_subject_id, &subject.subject_id)
            && matches_optional(&self.optional_relation, subject.relation_or_ellipsis())
    }
}

impl fmt::Display for SubjectFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.optional_subject_id.as_deref().unwrap_or("*"))?;
        if let Some(relation) = &self.optional_relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

/// Selects relationships for deletes and preconditions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct RelationshipFilter {
    pub resource_type: String,
    pub optional_resource_id: Option<String>,
    pub optional_relation: Option<String>,
    pub optional_subject_filter: Option<SubjectFilter>,
}

impl RelationshipFilter {
    /// A filter matching exactly one relationship
    pub fn exact(relationship: &Relationship) -> Self {
        let subject = &relationship.subject;
        Self {
            resource_type: relationship.resource_type.clone(),
            optional_resource_id: Some(relationship.resource_id.clone()),
            optional_relation: Some(relationship.relation.clone()),
            optional_subject_filter: Some(SubjectFilter {
                subject_type: subject.subject_type.clone(),
                optional_subject_id: Some(subject.subject_id.clone()),
                optional_relation: Some(subject.relation_or_ellipsis().to_string()),
            }),
        }
    }

    pub fn matches(&self, relationship: &Relationship) -> bool {
        relationship.resource_type == self.resource_type
            && matches_optional(&self.optional_resource_id, &relationship.resource_id)
            && matches_optional(&self.optional_relation, &relationship.relation)
            && self
                .optional_subject_filter
                .as_ref()
                .is_none_or(|f| f.matches(&relationship.subject))
    }

    pub fn validate(&self) -> DatastoreResult<()> {
        if !is_valid_namespace_name(&self.resource_type) {
            return Err(DatastoreError::InvalidArgument(format!(
                "relationship filter '{self}' has an invalid resource type"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RelationshipFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}",
            self.resource_type,
            self.optional_resource_id.as_deref().unwrap_or("*"),
            self.optional_relation.as_deref().unwrap_or("*")
        )?;
        if let Some(subject) = &self.optional_subject_filter {
            write!(f, "@{subject}")?;
        }
        Ok(())
    }
}

fn matches_optional(filter: &Option<String>, value: &str) -> bool {
    filter.as_deref().is_none_or(|expected| expected == value)
}

// ============================================================================
// Preconditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionOperation {
    /// At least one relationship matches the filter
    MustMatch,
    /// No relationship matches the filter
    MustNotMatch,
}

/// An assertion about the snapshot a transaction is pinned to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Precondition {
    pub operation: PreconditionOperation,
    pub filter: RelationshipFilter,
}

impl Precondition {
    pub fn must_match(filter: RelationshipFilter) -> Self {
        Self { operation: PreconditionOperation::MustMatch, filter }
    }

    pub fn must_not_match(filter: RelationshipFilter) -> Self {
        Self { operation: PreconditionOperation::MustNotMatch, filter }
    }

    /// Evaluate against whether any relationship in the snapshot matches the filter
    pub fn holds(&self, any_match: bool) -> bool {
        match self.operation {
            PreconditionOperation::MustMatch => any_match,
            PreconditionOperation::MustNotMatch => !any_match,
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            PreconditionOperation::MustMatch => write!(f, "must match {}", self.filter),
            PreconditionOperation::MustNotMatch => write!(f, "must not match {}", self.filter),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Approximate datastore statistics
///
/// Counts are estimates: engines may serve them from sampled or cached data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Stable identifier of this datastore instance
    pub unique_id: String,
    pub estimated_relationship_count: u64,
    pub object_type_statistics: Vec<ObjectTypeStatistics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeStatistics {
    pub object_type: String,
    pub relation_count: u64,
    pub permission_count: u64,
    pub estimated_relationship_count: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn rel(s: &str) -> Relationship {
        s.parse().unwrap()
    }

    #[test]
    fn test_revision_ordering_and_sentinel() {
        assert!(Revision::zero().is_none());
        assert!(!Revision(1).is_none());
        assert_eq!(Revision(1).next(), Revision(2));
        assert!(Revision(2) > Revision(1));
        assert_eq!("42".parse::<Revision>().unwrap(), Revision(42));
        assert!("abc".parse::<Revision>().is_err());
    }

    #[test]
    fn test_parse_direct_and_userset_relationships() {
        let direct = rel("document:readme#viewer@user:alice");
        assert_eq!(direct.resource_type, "document");
        assert_eq!(direct.resource_id, "readme");
        assert_eq!(direct.relation, "viewer");
        assert_eq!(direct.subject, SubjectReference::new("user", "alice"));

        let userset = rel("document:readme#viewer@group:eng#member");
        assert_eq!(userset.subject.optional_relation.as_deref(), Some("member"));
        assert_eq!(userset.to_string(), "document:readme#viewer@group:eng#member");

        let ellipsis = rel("document:readme#viewer@user:alice#...");
        assert_eq!(ellipsis.subject.optional_relation, None);
    }

    #[test]
    fn test_parse_rejects_malformed_relationships() {
        for input in [
            "",
            "document:readme#viewer",
            "document#viewer@user:alice",
            "document:readme@user:alice",
            "Document:readme#viewer@user:alice",
            "document:read me#viewer@user:alice",
            "document:*#viewer@user:alice",
            "document:readme#viewer@user:*#member",
        ] {
            assert!(input.parse::<Relationship>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_wildcard_subject_is_valid() {
        let relationship = rel("document:readme#viewer@user:*");
        assert!(relationship.subject.is_wildcard());
    }

    #[test]
    fn test_namespace_name_with_prefix() {
        assert!(is_valid_namespace_name("acme/document"));
        assert!(!is_valid_namespace_name("acme/"));
        assert!(!is_valid_namespace_name("a/b/c"));
    }

    #[test]
    fn test_object_filter_unset_fields_match_anything() {
        let relationship = rel("document:readme#viewer@user:alice");
        assert!(ObjectFilter::of_type("document").matches_resource(&relationship));
        assert!(
            ObjectFilter::builder()
                .resource_type("document")
                .optional_resource_id("readme")
                .optional_resource_relation("viewer")
                .build()
                .matches_resource(&relationship)
        );
        assert!(
            !ObjectFilter::builder()
                .resource_type("document")
                .optional_resource_id("other")
                .build()
                .matches_resource(&relationship)
        );
        assert!(!ObjectFilter::of_type("folder").matches_resource(&relationship));
    }

    #[test]
    fn test_object_filter_on_subject_side() {
        let direct = rel("document:readme#viewer@user:alice");
        let userset = rel("document:readme#viewer@group:eng#member");

        let users = ObjectFilter::of_type("user");
        assert!(users.matches_subject(&direct));
        assert!(!users.matches_subject(&userset));

        let members = ObjectFilter::builder()
            .resource_type("group")
            .optional_resource_relation("member")
            .build();
        assert!(members.matches_subject(&userset));

        let direct_only = ObjectFilter::builder()
            .resource_type("user")
            .optional_resource_relation(ELLIPSIS)
            .build();
        assert!(direct_only.matches_subject(&direct));
    }

    #[test]
    fn test_relationship_filter_with_subject_filter() {
        let relationship = rel("document:readme#viewer@user:alice");
        let filter = RelationshipFilter::builder()
            .resource_type("document")
            .optional_subject_filter(SubjectFilter::builder().subject_type("user").build())
            .build();
        assert!(filter.matches(&relationship));

        let other_subject = RelationshipFilter::builder()
            .resource_type("document")
            .optional_subject_filter(
                SubjectFilter::builder().subject_type("user").optional_subject_id("bob").build(),
            )
            .build();
        assert!(!other_subject.matches(&relationship));
    }

    #[test]
    fn test_exact_filter_matches_only_its_relationship() {
        let alice = rel("document:readme#viewer@user:alice");
        let bob = rel("document:readme#viewer@user:bob");
        let filter = RelationshipFilter::exact(&alice);
        assert!(filter.matches(&alice));
        assert!(!filter.matches(&bob));
    }

    #[test]
    fn test_precondition_holds() {
        let filter = RelationshipFilter::builder().resource_type("document").build();
        assert!(Precondition::must_match(filter.clone()).holds(true));
        assert!(!Precondition::must_match(filter.clone()).holds(false));
        assert!(Precondition::must_not_match(filter.clone()).holds(false));
        assert!(!Precondition::must_not_match(filter).holds(true));
    }

    #[test]
    fn test_update_serialization() {
        let update = RelationshipUpdate::touch(rel("document:readme#viewer@user:alice"));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["operation"], "touch");
        assert_eq!(json["relationship"]["subject"]["subject_id"], "alice");
        assert!(json["relationship"]["subject"].get("optional_relation").is_none());
    }

    proptest! {
        #[test]
        fn prop_display_parse_identity(
            resource_type in "[a-z][a-z0-9_]{0,8}",
            resource_id in "[a-zA-Z0-9_|=+-]{1,12}",
            relation in "[a-z][a-z_]{0,8}",
            subject_type in "[a-z][a-z0-9_]{0,8}",
            subject_id in "[a-zA-Z0-9_]{1,12}",
            subject_relation in proptest::option::of("[a-z][a-z_]{0,8}"),
        ) {
            let mut subject = SubjectReference::new(subject_type, subject_id);
            if let Some(relation) = subject_relation {
                subject = subject.with_relation(relation);
            }
            let relationship = Relationship::new(resource_type, resource_id, relation, subject);
            let parsed: Relationship = relationship.to_string().parse().unwrap();
            prop_assert_eq!(parsed, relationship);
        }
    }
}
