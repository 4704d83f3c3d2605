//! Bootstrap loader
//!
//! Sources are read in a fixed order: files in the order given, then inline
//! contents sorted by label. A namespace defined by several sources takes the
//! last definition. All namespaces are written first, then every relationship
//! is touched in a single transaction at head.

use std::path::PathBuf;

use inferadb_datastore_store::Datastore;
use inferadb_datastore_types::{
    DatastoreError, NamespaceDefinition, Relationship, RelationshipUpdate, Revision,
};
use serde::Deserialize;

use crate::parser::{SchemaError, parse_schema};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to read bootstrap file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bootstrap source '{label}' is not valid YAML: {source}")]
    Yaml {
        label: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("schema in bootstrap source '{label}' is invalid: {source}")]
    Parse {
        label: String,
        #[source]
        source: SchemaError,
    },

    #[error("bootstrap source '{label}' line {line}: {message}")]
    Relationship { label: String, line: usize, message: String },

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

/// Where bootstrap data comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapSource {
    File(PathBuf),
    Contents { label: String, contents: Vec<u8> },
}

impl BootstrapSource {
    pub fn contents(label: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self::Contents { label: label.into(), contents: contents.into() }
    }

    fn label(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Contents { label, .. } => label.clone(),
        }
    }

    async fn read(&self) -> Result<Vec<u8>, BootstrapError> {
        match self {
            Self::File(path) => tokio::fs::read(path)
                .await
                .map_err(|source| BootstrapError::Io { path: path.clone(), source }),
            Self::Contents { contents, .. } => Ok(contents.clone()),
        }
    }
}

/// What a bootstrap run wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub namespaces_written: usize,
    /// Namespaces left alone because they existed and overwrite was off
    pub namespaces_skipped: usize,
    pub relationships_written: usize,
    /// Revision of the last write, if anything was written
    pub revision: Option<Revision>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceDocument {
    Document(BootstrapDocument),
    /// A bare schema with no relationships
    Schema(String),
}

#[derive(Debug, Default, Deserialize)]
struct BootstrapDocument {
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    relationships: Option<String>,
}

#[derive(Debug, Default)]
struct Collected {
    namespaces: Vec<NamespaceDefinition>,
    relationships: Vec<Relationship>,
}

impl Collected {
    fn add_namespace(&mut self, definition: NamespaceDefinition, label: &str) {
        match self.namespaces.iter_mut().find(|d| d.name == definition.name) {
            Some(existing) => {
                tracing::warn!(
                    namespace = %definition.name,
                    source = %label,
                    "Namespace defined more than once; using the later definition"
                );
                *existing = definition;
            },
            None => self.namespaces.push(definition),
        }
    }
}

/// Processing order: files as given, then contents by label
fn ordered(sources: &[BootstrapSource]) -> Vec<&BootstrapSource> {
    let mut files: Vec<_> =
        sources.iter().filter(|s| matches!(s, BootstrapSource::File(_))).collect();
    let mut contents: Vec<_> =
        sources.iter().filter(|s| matches!(s, BootstrapSource::Contents { .. })).collect();
    contents.sort_by_key(|s| s.label());
    files.append(&mut contents);
    files
}

fn parse_relationships(
    text: &str,
    label: &str,
    out: &mut Vec<Relationship>,
) -> Result<(), BootstrapError> {
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let relationship = line.parse::<Relationship>().map_err(|e| BootstrapError::Relationship {
            label: label.to_string(),
            line: index + 1,
            message: e.to_string(),
        })?;
        out.push(relationship);
    }
    Ok(())
}

/// A source is a YAML document, or schema text on its own
fn decode(bytes: &[u8], label: &str) -> Result<BootstrapDocument, BootstrapError> {
    let text = String::from_utf8_lossy(bytes);
    if text.trim().is_empty() {
        return Ok(BootstrapDocument::default());
    }
    match serde_yaml::from_str::<SourceDocument>(&text) {
        Ok(SourceDocument::Document(document)) => Ok(document),
        Ok(SourceDocument::Schema(schema)) => {
            Ok(BootstrapDocument { schema: Some(schema), relationships: None })
        },
        Err(_) if text.trim_start().starts_with("definition") && parse_schema(&text).is_ok() => {
            Ok(BootstrapDocument { schema: Some(text.into_owned()), relationships: None })
        },
        Err(source) => Err(BootstrapError::Yaml { label: label.to_string(), source }),
    }
}

async fn collect(sources: &[BootstrapSource]) -> Result<Collected, BootstrapError> {
    let mut collected = Collected::default();
    for source in ordered(sources) {
        let label = source.label();
        let bytes = source.read().await?;
        let document = decode(&bytes, &label)?;

        let before = collected.relationships.len();
        if let Some(schema) = &document.schema {
            let definitions = parse_schema(schema)
                .map_err(|source| BootstrapError::Parse { label: label.clone(), source })?;
            for definition in definitions {
                collected.add_namespace(definition, &label);
            }
        }
        if let Some(relationships) = &document.relationships {
            parse_relationships(relationships, &label, &mut collected.relationships)?;
        }
        tracing::debug!(
            source = %label,
            relationships = collected.relationships.len() - before,
            "Read bootstrap source"
        );
    }
    Ok(collected)
}

/// Write the schema and relationships from `sources` into `datastore`
///
/// With `overwrite` off, namespaces that already exist are skipped.
pub async fn load_bootstrap(
    datastore: &Datastore,
    sources: &[BootstrapSource],
    overwrite: bool,
) -> Result<BootstrapSummary, BootstrapError> {
    let collected = collect(sources).await?;
    let mut summary = BootstrapSummary::default();

    for definition in collected.namespaces {
        if !overwrite {
            match datastore.read_namespace(&definition.name).await {
                Ok(_) => {
                    tracing::info!(namespace = %definition.name, "Namespace exists, skipping");
                    summary.namespaces_skipped += 1;
                    continue;
                },
                Err(DatastoreError::NotFound(_)) => {},
                Err(e) => return Err(e.into()),
            }
        }
        summary.revision = Some(datastore.write_namespace(definition).await?);
        summary.namespaces_written += 1;
    }

    if !collected.relationships.is_empty() {
        let count = collected.relationships.len();
        let mut tx = datastore.begin_at_head().await?;
        tx.write_relationships(
            collected.relationships.into_iter().map(RelationshipUpdate::touch).collect(),
        )
        .await?;
        summary.revision = Some(tx.commit().await?);
        summary.relationships_written = count;
    }

    tracing::info!(
        namespaces = summary.namespaces_written,
        skipped = summary.namespaces_skipped,
        relationships = summary.relationships_written,
        "Bootstrap complete"
    );
    Ok(summary)
}
