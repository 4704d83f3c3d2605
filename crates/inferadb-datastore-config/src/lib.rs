//! # InferaDB Datastore Config - Configuration Management
//!
//! Loads datastore configuration from defaults, an optional YAML file and
//! environment variables, in increasing order of precedence.
//!
//! The datastore reads the `datastore:` section of a shared root file; other
//! sections are ignored:
//!
//! ```yaml
//! datastore:
//!   logging: "info"
//!   engine: "memory"
//!   quantization_interval_ms: 5000
//!   gc_window_secs: 86400
//!   bootstrap:
//!     files: ["schema.yaml"]
//!     overwrite: true
//!   telemetry:
//!     enabled: true
//!     interval_secs: 60
//! ```

#![deny(unsafe_code)]

use std::path::Path;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use inferadb_datastore_const::{
    DEFAULT_GC_WINDOW_SECS, DEFAULT_QUANTIZATION_INTERVAL_MS, DEFAULT_TELEMETRY_INTERVAL_SECS,
    DEFAULT_WATCH_BATCH_SIZE, DEFAULT_WATCH_BUFFER_LENGTH,
};
use serde::{Deserialize, Serialize};

/// Engines this build knows how to construct
pub const KNOWN_ENGINES: &[&str] = &["memory"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root configuration wrapper for unified config file support
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RootConfig {
    #[serde(default)]
    pub datastore: Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_logging")]
    pub logging: String,

    /// Storage engine name
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Quantization window for `quantized_revision`; 0 returns head
    #[serde(default = "default_quantization_interval_ms")]
    pub quantization_interval_ms: u64,

    /// Revisions older than this are garbage collected; 0 disables collection
    #[serde(default = "default_gc_window_secs")]
    pub gc_window_secs: u64,

    #[serde(default = "default_watch_buffer_length")]
    pub watch_buffer_length: usize,

    #[serde(default = "default_watch_batch_size")]
    pub watch_batch_size: usize,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Schema and relationship files loaded into a fresh datastore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub files: Vec<String>,

    /// Replace namespaces that already exist
    #[serde(default = "default_bootstrap_overwrite")]
    pub overwrite: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { files: Vec::new(), overwrite: default_bootstrap_overwrite() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_telemetry_interval_secs")]
    pub interval_secs: u64,

    /// OTLP endpoint for trace export; tracing stays local when unset
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_telemetry_interval_secs(),
            otlp_endpoint: None,
        }
    }
}

fn default_logging() -> String {
    "info".to_string()
}

fn default_engine() -> String {
    "memory".to_string()
}

fn default_quantization_interval_ms() -> u64 {
    DEFAULT_QUANTIZATION_INTERVAL_MS
}

fn default_gc_window_secs() -> u64 {
    DEFAULT_GC_WINDOW_SECS
}

fn default_watch_buffer_length() -> usize {
    DEFAULT_WATCH_BUFFER_LENGTH
}

fn default_watch_batch_size() -> usize {
    DEFAULT_WATCH_BATCH_SIZE
}

fn default_bootstrap_overwrite() -> bool {
    true
}

fn default_telemetry_interval_secs() -> u64 {
    DEFAULT_TELEMETRY_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: default_logging(),
            engine: default_engine(),
            quantization_interval_ms: default_quantization_interval_ms(),
            gc_window_secs: default_gc_window_secs(),
            watch_buffer_length: default_watch_buffer_length(),
            watch_batch_size: default_watch_batch_size(),
            bootstrap: BootstrapConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration at startup
    pub fn validate(&self) -> anyhow::Result<()> {
        if !LOG_LEVELS.contains(&self.logging.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid logging level: '{}'. Must be one of: {}",
                self.logging,
                LOG_LEVELS.join(", ")
            );
        }

        if !KNOWN_ENGINES.contains(&self.engine.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid engine: '{}'. Must be one of: {}",
                self.engine,
                KNOWN_ENGINES.join(", ")
            );
        }

        if self.watch_buffer_length == 0 {
            anyhow::bail!("watch_buffer_length must be greater than 0");
        }
        if self.watch_batch_size == 0 {
            anyhow::bail!("watch_batch_size must be greater than 0");
        }

        // Quantized revisions must stay inside retained history
        if self.gc_window_secs > 0
            && u128::from(self.gc_window_secs) * 1000 <= u128::from(self.quantization_interval_ms)
        {
            anyhow::bail!(
                "gc_window_secs ({}s) must be larger than quantization_interval_ms ({}ms)",
                self.gc_window_secs,
                self.quantization_interval_ms
            );
        }

        if self.telemetry.enabled && self.telemetry.interval_secs == 0 {
            anyhow::bail!(
                "telemetry.interval_secs must be greater than 0 when telemetry is enabled"
            );
        }

        if let Some(endpoint) = &self.telemetry.otlp_endpoint
            && !endpoint.starts_with("http://")
            && !endpoint.starts_with("https://")
        {
            anyhow::bail!(
                "telemetry.otlp_endpoint must start with http:// or https://, got: {endpoint}"
            );
        }

        if self.gc_window_secs == 0 {
            tracing::warn!("gc_window_secs is 0. Revision history will grow without bound.");
        }

        Ok(())
    }
}

/// Load configuration from a file with environment overrides
///
/// Environment variables use the `INFERADB__DATASTORE__` prefix:
/// - `INFERADB__DATASTORE__LOGGING=debug`
/// - `INFERADB__DATASTORE__ENGINE=memory`
/// - `INFERADB__DATASTORE__GC_WINDOW_SECS=3600`
/// - `INFERADB__DATASTORE__TELEMETRY__ENABLED=true`
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let builder = ConfigBuilder::builder().add_source(File::from(path.as_ref()).required(false));
    let builder =
        builder.add_source(Environment::with_prefix("INFERADB").separator("__").try_parsing(true));

    let root: RootConfig = builder.build()?.try_deserialize()?;
    Ok(root.datastore)
}

/// Load configuration, falling back to defaults when loading fails
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Config {
    match load(path.as_ref()) {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully from {:?}", path.as_ref());
            config
        },
        Err(e) => {
            tracing::warn!(
                "Failed to load config from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Config::default()
        },
    }
}
