//! # InferaDB Datastore Bootstrap
//!
//! Loads schema and relationships into a datastore from YAML sources:
//!
//! ```yaml
//! schema: |
//!   definition user {}
//!   definition document {
//!     relation viewer: user
//!     permission view = viewer
//!   }
//! relationships: |
//!   document:readme#viewer@user:alice
//! ```

#![deny(unsafe_code)]

pub mod loader;
pub mod parser;

pub use loader::{BootstrapError, BootstrapSource, BootstrapSummary, load_bootstrap};
pub use parser::{SchemaError, parse_schema};
