//! Namespace (schema) definitions
//!
//! A namespace enumerates the relations and permissions valid for one resource
//! type. Definitions are stored whole: writes replace, deletes remove.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{DatastoreError, DatastoreResult, is_valid_identifier, is_valid_namespace_name};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    pub name: String,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

impl NamespaceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), relations: Vec::new() }
    }

    pub fn with_relation(mut self, relation: RelationDefinition) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn relation_count(&self) -> u64 {
        self.relations.iter().filter(|r| !r.is_permission()).count() as u64
    }

    pub fn permission_count(&self) -> u64 {
        self.relations.iter().filter(|r| r.is_permission()).count() as u64
    }

    /// Structural validation: a valid name, unique member names, and rewrites
    /// that only reference members of this namespace
    pub fn validate(&self) -> DatastoreResult<()> {
        if !is_valid_namespace_name(&self.name) {
            return Err(DatastoreError::InvalidArgument(format!(
                "invalid namespace name '{}'",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for relation in &self.relations {
            if !is_valid_identifier(&relation.name) {
                return Err(DatastoreError::InvalidArgument(format!(
                    "namespace '{}' has an invalid relation name '{}'",
                    self.name, relation.name
                )));
            }
            if !seen.insert(relation.name.as_str()) {
                return Err(DatastoreError::InvalidArgument(format!(
                    "namespace '{}' defines '{}' more than once",
                    self.name, relation.name
                )));
            }
        }

        for relation in &self.relations {
            let RelationKind::Permission { rewrite } = &relation.kind else { continue };
            for referenced in rewrite.referenced_relations() {
                if !seen.contains(referenced) {
                    return Err(DatastoreError::InvalidArgument(format!(
                        "permission '{}#{}' references unknown relation '{}'",
                        self.name, relation.name, referenced
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub kind: RelationKind,
}

impl RelationDefinition {
    pub fn relation(name: impl Into<String>, allowed_subjects: Vec<AllowedSubject>) -> Self {
        Self { name: name.into(), kind: RelationKind::Relation { allowed_subjects } }
    }

    pub fn permission(name: impl Into<String>, rewrite: UsersetRewrite) -> Self {
        Self { name: name.into(), kind: RelationKind::Permission { rewrite } }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self.kind, RelationKind::Permission { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// Stored relation: relationships may be written for it
    Relation { allowed_subjects: Vec<AllowedSubject> },
    /// Computed permission
    Permission { rewrite: UsersetRewrite },
}

/// A subject type a relation accepts: `user`, `group#member` or `user:*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedSubject {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default)]
    pub wildcard: bool,
}

impl AllowedSubject {
    pub fn direct(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), relation: None, wildcard: false }
    }

    pub fn userset(namespace: impl Into<String>, relation: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), relation: Some(relation.into()), wildcard: false }
    }

    pub fn wildcard(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), relation: None, wildcard: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsersetRewrite {
    /// `viewer`
    ComputedUserset { relation: String },
    /// `parent->viewer`
    TupleToUserset { tupleset: String, computed_relation: String },
    /// `a + b`
    Union(Vec<UsersetRewrite>),
    /// `a & b`
    Intersection(Vec<UsersetRewrite>),
    /// `a - b`
    Exclusion { base: Box<UsersetRewrite>, subtract: Box<UsersetRewrite> },
}

impl UsersetRewrite {
    pub fn computed(relation: impl Into<String>) -> Self {
        Self::ComputedUserset { relation: relation.into() }
    }

    pub fn arrow(tupleset: impl Into<String>, computed_relation: impl Into<String>) -> Self {
        Self::TupleToUserset {
            tupleset: tupleset.into(),
            computed_relation: computed_relation.into(),
        }
    }

    /// Relations of the enclosing namespace this rewrite reads
    ///
    /// The computed side of an arrow belongs to another namespace and is not
    /// included.
    pub fn referenced_relations(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::ComputedUserset { relation } => out.push(relation),
            Self::TupleToUserset { tupleset, .. } => out.push(tupleset),
            Self::Union(children) | Self::Intersection(children) => {
                children.iter().for_each(|child| child.collect_references(out))
            },
            Self::Exclusion { base, subtract } => {
                base.collect_references(out);
                subtract.collect_references(out);
            },
        }
    }
}
