//! Datastore factory
//!
//! Turns configuration into a running, bootstrapped [`Datastore`].

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use inferadb_datastore_bootstrap::{BootstrapError, BootstrapSource, load_bootstrap};
use inferadb_datastore_config::Config;
use inferadb_datastore_const::{
    DEFAULT_GC_WINDOW_SECS, DEFAULT_QUANTIZATION_INTERVAL_MS, DEFAULT_READY_TIMEOUT_SECS,
    DEFAULT_WATCH_BATCH_SIZE, DEFAULT_WATCH_BUFFER_LENGTH,
};
use inferadb_datastore_memory::{MemoryDatastore, MemoryEngineOptions};
use inferadb_datastore_store::Datastore;
use inferadb_datastore_types::DatastoreError;

/// Storage engine type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// In-memory engine (for testing and development)
    #[default]
    Memory,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Memory => "memory",
        }
    }
}

impl FromStr for EngineKind {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(EngineKind::Memory),
            _ => Err(DatastoreError::InvalidArgument(format!("unknown engine: {s}"))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

/// Everything needed to build a datastore
#[derive(Debug, Clone, bon::Builder)]
pub struct DatastoreOptions {
    #[builder(default)]
    pub engine: EngineKind,

    #[builder(default = Duration::from_millis(DEFAULT_QUANTIZATION_INTERVAL_MS))]
    pub quantization_interval: Duration,

    #[builder(default = Duration::from_secs(DEFAULT_GC_WINDOW_SECS))]
    pub gc_window: Duration,

    #[builder(default = DEFAULT_WATCH_BUFFER_LENGTH)]
    pub watch_buffer_length: usize,

    #[builder(default = DEFAULT_WATCH_BATCH_SIZE)]
    pub watch_batch_size: usize,

    /// Bootstrap files, processed in order
    #[builder(default)]
    pub bootstrap_files: Vec<PathBuf>,

    /// Inline bootstrap sources keyed by label, processed after files
    #[builder(default)]
    pub bootstrap_contents: BTreeMap<String, Vec<u8>>,

    /// Replace namespaces that already exist
    #[builder(default = true)]
    pub bootstrap_overwrite: bool,

    #[builder(default = Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS))]
    pub ready_timeout: Duration,
}

impl Default for DatastoreOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DatastoreOptions {
    pub fn from_config(config: &Config) -> Result<Self, DatastoreError> {
        Ok(Self::builder()
            .engine(config.engine.parse()?)
            .quantization_interval(Duration::from_millis(config.quantization_interval_ms))
            .gc_window(Duration::from_secs(config.gc_window_secs))
            .watch_buffer_length(config.watch_buffer_length)
            .watch_batch_size(config.watch_batch_size)
            .bootstrap_files(config.bootstrap.files.iter().map(PathBuf::from).collect())
            .bootstrap_overwrite(config.bootstrap.overwrite)
            .build())
    }

    fn bootstrap_sources(&self) -> Vec<BootstrapSource> {
        self.bootstrap_files
            .iter()
            .cloned()
            .map(BootstrapSource::File)
            .chain(self.bootstrap_contents.iter().map(|(label, contents)| {
                BootstrapSource::contents(label.clone(), contents.clone())
            }))
            .collect()
    }
}

fn build_engine(options: &DatastoreOptions) -> Datastore {
    match options.engine {
        EngineKind::Memory => {
            let engine = MemoryDatastore::new(
                MemoryEngineOptions::builder()
                    .quantization_interval(options.quantization_interval)
                    .gc_window(options.gc_window)
                    .watch_buffer_length(options.watch_buffer_length)
                    .watch_batch_size(options.watch_batch_size)
                    .build(),
            );
            Datastore::from_engine(Arc::new(engine))
        },
    }
}

/// Build, await readiness and bootstrap a datastore
///
/// A datastore whose bootstrap fails is closed before the error is returned.
pub async fn new_datastore(options: DatastoreOptions) -> Result<Datastore, StartupError> {
    let datastore = build_engine(&options);
    datastore.wait_until_ready(options.ready_timeout).await?;

    let sources = options.bootstrap_sources();
    if !sources.is_empty() {
        match load_bootstrap(&datastore, &sources, options.bootstrap_overwrite).await {
            Ok(summary) => tracing::info!(
                sources = sources.len(),
                namespaces = summary.namespaces_written,
                relationships = summary.relationships_written,
                "Datastore bootstrapped"
            ),
            Err(e) => {
                if let Err(close_error) = datastore.close().await {
                    tracing::warn!(
                        error = %close_error,
                        "Failed to close datastore after bootstrap error"
                    );
                }
                return Err(e.into());
            },
        }
    }

    tracing::info!(engine = %options.engine, "Datastore ready");
    Ok(datastore)
}
