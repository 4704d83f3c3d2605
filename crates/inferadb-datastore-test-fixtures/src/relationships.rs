//! Relationship helpers
//!
//! Relationships are written in their canonical text form,
//! `document:readme#viewer@user:alice`, and parsed here.

use inferadb_datastore_types::{Relationship, RelationshipUpdate, SubjectReference};
use proptest::prelude::*;

/// Parse a relationship, panicking on malformed input
///
/// ```
/// use inferadb_datastore_test_fixtures::rel;
///
/// let r = rel("document:readme#viewer@user:alice");
/// assert_eq!(r.resource_id, "readme");
/// ```
pub fn rel(s: &str) -> Relationship {
    s.parse().unwrap_or_else(|e| panic!("invalid test relationship {s:?}: {e}"))
}

pub fn touch(s: &str) -> RelationshipUpdate {
    RelationshipUpdate::touch(rel(s))
}

pub fn create(s: &str) -> RelationshipUpdate {
    RelationshipUpdate::create(rel(s))
}

pub fn delete(s: &str) -> RelationshipUpdate {
    RelationshipUpdate::delete(rel(s))
}

/// Relationships drawn from a deliberately small universe so that generated
/// operations collide often
pub fn arb_relationship() -> impl Strategy<Value = Relationship> {
    (
        prop::sample::select(vec!["document", "folder"]),
        prop::sample::select(vec!["a", "b", "c"]),
        prop::sample::select(vec!["viewer", "editor"]),
        prop::sample::select(vec!["alice", "bob", "carol"]),
    )
        .prop_map(|(resource_type, resource_id, relation, subject_id)| {
            Relationship::new(
                resource_type,
                resource_id,
                relation,
                SubjectReference::new("user", subject_id),
            )
        })
}
