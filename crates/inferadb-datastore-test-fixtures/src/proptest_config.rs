//! Shared proptest configuration
//!
//! | Tier     | Feature Flag  | Default Cases |
//! |----------|---------------|---------------|
//! | Fast     | `test-fast`   | 10            |
//! | Standard | (default)     | 50            |
//! | Full     | `test-full`   | 500           |
//!
//! The `PROPTEST_CASES` environment variable overrides the tier default.

use proptest::test_runner::Config as ProptestConfig;

/// Default number of proptest cases for the active test tier
pub const DEFAULT_PROPTEST_CASES: u32 = if cfg!(feature = "test-full") {
    500
} else if cfg!(feature = "test-fast") {
    10
} else {
    50
};

/// Number of cases to run, honouring `PROPTEST_CASES`
#[must_use]
pub fn test_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PROPTEST_CASES)
}

/// A proptest configuration with [`test_cases`] cases
#[must_use]
pub fn proptest_config() -> ProptestConfig {
    ProptestConfig::with_cases(test_cases())
}
