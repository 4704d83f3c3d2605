//! # InferaDB Datastore Constants
//!
//! Centralized defaults shared by the datastore engines, configuration and tooling.

// ============================================================================
// Revision Constants
// ============================================================================

/// Default quantization interval in milliseconds
///
/// Quantized revisions are shared by every caller inside the same window, so
/// caches keyed by revision can be reused across concurrent requests.
pub const DEFAULT_QUANTIZATION_INTERVAL_MS: u64 = 5_000;

/// Default garbage collection window in seconds
///
/// Revisions older than this are no longer readable and cannot be used as a
/// watch starting point.
pub const DEFAULT_GC_WINDOW_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// Watch Constants
// ============================================================================

/// Default buffer length of a watch subscription's data channel
///
/// A consumer that falls this many revisions behind blocks its own producer,
/// never the committing writers.
pub const DEFAULT_WATCH_BUFFER_LENGTH: usize = 128;

/// Default number of revisions a watch producer reads per history scan
pub const DEFAULT_WATCH_BATCH_SIZE: usize = 100;

// ============================================================================
// Lifecycle Constants
// ============================================================================

/// Initial delay between readiness checks
pub const READY_INITIAL_BACKOFF_MS: u64 = 10;

/// Upper bound for the delay between readiness checks
pub const READY_MAX_BACKOFF_MS: u64 = 1_000;

/// Default time to wait for a datastore to report ready
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Default interval between telemetry collections in seconds
pub const DEFAULT_TELEMETRY_INTERVAL_SECS: u64 = 60;
