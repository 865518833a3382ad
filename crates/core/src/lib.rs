//! svnport core library.
//!
//! This crate converts Subversion history into git fast-import streams:
//! rule parsing and matching, the revision exporter, per-repository branch
//! ledgers with incremental resume, and the sinks that feed `git fast-import`.

pub mod config;
pub mod errors;
pub mod export;
pub mod fastimport;
pub mod identity;
pub mod ledger;
pub mod migration;
pub mod registry;
pub mod rules;
pub mod source;

/// A Subversion revision number. Zero and negative values mean "none".
pub type Revnum = i64;

// Re-exports for convenience.
pub use config::MigrationConfig;
pub use errors::CoreError;
pub use export::{RevisionExporter, RevisionSummary};
pub use migration::{Migration, MigrationReport};
pub use registry::Registry;
