//! Per-repository bookkeeping: branches, marks, tags, transactions and
//! incremental resume.
//!
//! A [`BranchLedger`] owns everything written to one output repository. It
//! records which revision left each branch at which commit mark, buffers
//! branch resets until the revision's commits are written, queues annotated
//! tags until the end of the run and drives the repository's [`Sink`].
//!
//! [`Sink`]: crate::fastimport::Sink

pub mod branch;
pub mod marks;
pub mod merge;
pub mod repository;
pub mod resume;
pub mod transaction;

pub use branch::{Branch, Lookup};
pub use marks::{MarkAllocator, FILE_MARK_SENTINEL, NOTES_MARK};
pub use merge::{MergePolicy, SignatureMergePolicy};
pub use repository::{AnnotatedTag, BranchLedger};
pub use resume::{last_valid_mark, parse_progress, ProgressEntry};
pub use transaction::Transaction;
