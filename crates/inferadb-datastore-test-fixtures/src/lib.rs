//! Test fixtures for the InferaDB datastore crates
//!
//! Shared relationship helpers, proptest strategies and proptest configuration
//! used across the unit and integration test suites.

#![deny(unsafe_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod proptest_config;
pub mod relationships;

pub use proptest_config::{proptest_config, test_cases};
pub use relationships::{arb_relationship, create, delete, rel, touch};
