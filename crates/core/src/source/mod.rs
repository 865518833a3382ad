//! Access to the Subversion history being migrated.
//!
//! The exporter only talks to [`RevisionSource`]. [`SvnlookSource`] reads a
//! local repository through the `svnlook` tool; [`MemorySource`] holds a
//! synthetic history in memory.

pub mod memory;
pub mod parser;
pub mod svnlook;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::errors::SourceError;
use crate::Revnum;

pub use memory::MemorySource;
pub use svnlook::SvnlookSource;

/// Byte stream of a file's contents.
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

/// Kind of change recorded for a path in one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
    Replace,
    /// Never produced by a committed revision; rejected by the exporter.
    Reset,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "add"),
            ChangeKind::Modify => write!(f, "modify"),
            ChangeKind::Delete => write!(f, "delete"),
            ChangeKind::Replace => write!(f, "replace"),
            ChangeKind::Reset => write!(f, "reset"),
        }
    }
}

/// One entry of a revision's change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Absolute repository path without a trailing slash, e.g. `/trunk/src`.
    pub path: String,
    pub kind: ChangeKind,
    /// For deletions, whether the removed node was a directory.
    pub is_directory: bool,
    pub copied_from: Option<(String, Revnum)>,
    pub properties_modified: bool,
}

/// What exists at a path in a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    None,
    File,
    Directory,
}

/// A child of a directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
}

/// Author, date and log message of a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionMetadata {
    pub author: Option<String>,
    /// Seconds since the Unix epoch, UTC.
    pub epoch: i64,
    pub message: Vec<u8>,
}

pub type Properties = BTreeMap<String, Vec<u8>>;

/// Read access to a versioned tree.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// The youngest revision in the repository.
    async fn latest_revision(&self) -> Result<Revnum, SourceError>;

    /// Every path changed by `revision`, in no particular order.
    async fn changed_paths(&self, revision: Revnum) -> Result<Vec<ChangeRecord>, SourceError>;

    /// What `path` is in `revision`. Missing paths and revisions below 1 yield
    /// [`NodeKind::None`].
    async fn node_kind(&self, revision: Revnum, path: &str) -> Result<NodeKind, SourceError>;

    /// Children of a directory, sorted by name.
    async fn list_directory(&self, revision: Revnum, path: &str) -> Result<Vec<DirEntry>, SourceError>;

    async fn file_length(&self, revision: Revnum, path: &str) -> Result<u64, SourceError>;

    async fn file_contents(&self, revision: Revnum, path: &str) -> Result<ContentStream, SourceError>;

    /// Versioned properties of a node.
    async fn properties(&self, revision: Revnum, path: &str) -> Result<Properties, SourceError>;

    async fn revision_metadata(&self, revision: Revnum) -> Result<RevisionMetadata, SourceError>;

    async fn is_directory(&self, revision: Revnum, path: &str) -> Result<bool, SourceError> {
        Ok(self.node_kind(revision, path).await? == NodeKind::Directory)
    }

    /// Whether `path` was a directory in `revision`; false for revisions below 1.
    async fn was_directory(&self, revision: Revnum, path: &str) -> Result<bool, SourceError> {
        if revision < 1 {
            return Ok(false);
        }
        self.is_directory(revision, path).await
    }
}
