//! Schema DSL parser
//!
//! ```text
//! definition user {}
//!
//! definition document {
//!     relation parent: folder
//!     relation viewer: user | group#member | user:*
//!     permission view = viewer + parent->view
//! }
//! ```
//!
//! `&` binds tighter than `+`, and `-` tighter than `&`; parentheses group.

use inferadb_datastore_types::{
    AllowedSubject, NamespaceDefinition, RelationDefinition, UsersetRewrite,
};
use pest::{
    Parser,
    error::LineColLocation,
    iterators::{Pair, Pairs},
};
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "schema.pest"]
struct SchemaParser;

/// A schema that failed to parse or validate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}{message}", location(.position))]
pub struct SchemaError {
    pub message: String,
    /// 1-based line and column of a syntax error
    pub position: Option<(usize, usize)>,
}

impl SchemaError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), position: None }
    }
}

fn location(position: &Option<(usize, usize)>) -> String {
    position.map(|(line, column)| format!("{line}:{column}: ")).unwrap_or_default()
}

impl From<pest::error::Error<Rule>> for SchemaError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        let position = match e.line_col {
            LineColLocation::Pos(pos) | LineColLocation::Span(pos, _) => pos,
        };
        Self { message: e.variant.message().into_owned(), position: Some(position) }
    }
}

type Result<T> = std::result::Result<T, SchemaError>;

/// Parse schema text into validated namespace definitions, in source order
pub fn parse_schema(source: &str) -> Result<Vec<NamespaceDefinition>> {
    let schema = SchemaParser::parse(Rule::schema, source)?
        .next()
        .ok_or_else(|| SchemaError::new("empty schema"))?;

    schema
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::definition)
        .map(|pair| {
            let definition = parse_definition(pair)?;
            definition.validate().map_err(|e| SchemaError::new(e.to_string()))?;
            Ok(definition)
        })
        .collect()
}

fn next_str(inner: &mut Pairs<'_, Rule>, expected: &str) -> Result<String> {
    inner
        .next()
        .map(|pair| pair.as_str().to_string())
        .ok_or_else(|| SchemaError::new(format!("expected {expected}")))
}

fn parse_definition(pair: Pair<'_, Rule>) -> Result<NamespaceDefinition> {
    let mut inner = pair.into_inner();
    let mut definition = NamespaceDefinition::new(next_str(&mut inner, "namespace name")?);

    for member in inner {
        let relation = match member.as_rule() {
            Rule::relation => parse_relation(member)?,
            Rule::permission => parse_permission(member)?,
            rule => return Err(SchemaError::new(format!("unexpected {rule:?} in definition"))),
        };
        definition = definition.with_relation(relation);
    }
    Ok(definition)
}

fn parse_relation(pair: Pair<'_, Rule>) -> Result<RelationDefinition> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "relation name")?;
    let allowed = inner.map(parse_allowed_subject).collect::<Result<Vec<_>>>()?;
    Ok(RelationDefinition::relation(name, allowed))
}

fn parse_allowed_subject(pair: Pair<'_, Rule>) -> Result<AllowedSubject> {
    let subject =
        pair.into_inner().next().ok_or_else(|| SchemaError::new("expected subject type"))?;
    let rule = subject.as_rule();
    let mut inner = subject.into_inner();
    let namespace = next_str(&mut inner, "subject namespace")?;
    match rule {
        Rule::wildcard_subject => Ok(AllowedSubject::wildcard(namespace)),
        Rule::userset_subject => {
            Ok(AllowedSubject::userset(namespace, next_str(&mut inner, "subject relation")?))
        },
        Rule::direct_subject => Ok(AllowedSubject::direct(namespace)),
        rule => Err(SchemaError::new(format!("unexpected {rule:?} in relation"))),
    }
}

fn parse_permission(pair: Pair<'_, Rule>) -> Result<RelationDefinition> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "permission name")?;
    let expression =
        inner.next().ok_or_else(|| SchemaError::new(format!("permission '{name}' has no body")))?;
    Ok(RelationDefinition::permission(name, parse_expression(expression)?))
}

fn parse_expression(pair: Pair<'_, Rule>) -> Result<UsersetRewrite> {
    match pair.as_rule() {
        Rule::union => collapse(pair, UsersetRewrite::Union),
        Rule::intersection => collapse(pair, UsersetRewrite::Intersection),
        Rule::exclusion => {
            let mut operands = pair.into_inner().map(parse_expression);
            let base = operands.next().ok_or_else(|| SchemaError::new("expected expression"))??;
            operands.try_fold(base, |base, subtract| -> Result<UsersetRewrite> {
                let subtract = Box::new(subtract?);
                Ok(UsersetRewrite::Exclusion { base: Box::new(base), subtract })
            })
        },
        Rule::arrow => {
            let mut inner = pair.into_inner();
            let tupleset = next_str(&mut inner, "tupleset relation")?;
            Ok(UsersetRewrite::arrow(tupleset, next_str(&mut inner, "computed relation")?))
        },
        Rule::computed => Ok(UsersetRewrite::computed(pair.as_str().trim())),
        rule => Err(SchemaError::new(format!("unexpected {rule:?} in expression"))),
    }
}

/// One operand stays as is; several become `combine(operands)`
fn collapse(
    pair: Pair<'_, Rule>,
    combine: fn(Vec<UsersetRewrite>) -> UsersetRewrite,
) -> Result<UsersetRewrite> {
    let mut operands = pair.into_inner().map(parse_expression).collect::<Result<Vec<_>>>()?;
    match operands.len() {
        0 => Err(SchemaError::new("expected expression")),
        1 => Ok(operands.remove(0)),
        _ => Ok(combine(operands)),
    }
}
