#![forbid(unsafe_code)]
//! hopc-core: shared vocabulary for the hop compiler.
//!
//! Everything that more than one layer needs to agree on lives here:
//! typed IDs, data/value/exec types, operator symbols, size statistics,
//! the compiler configuration, the error taxonomy, and content hashing.
//!
//! No DAG logic, estimation, or plan construction lives in this crate.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod stats;
pub mod types;

/// Compiler version string recorded in manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
