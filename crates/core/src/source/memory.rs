//! In-memory versioned tree.
//!
//! Every committed revision keeps a full snapshot of the tree, which keeps
//! lookups trivial at the cost of memory; it is meant for synthetic
//! histories, not for real repositories.
//!
//! ```
//! use svnport_core::source::MemorySource;
//!
//! let mut repo = MemorySource::new();
//! let r1 = repo
//!     .commit("alice", 1_000, "initial layout")
//!     .mkdir("/trunk")
//!     .put("/trunk/README", "hello\n")
//!     .done()
//!     .unwrap();
//! let r2 = repo
//!     .commit("bob", 2_000, "branch")
//!     .copy("/trunk", r1, "/branches/stable")
//!     .done()
//!     .unwrap();
//! assert_eq!(r2, 2);
//! ```

use std::collections::BTreeMap;
use std::io::Cursor;

use async_trait::async_trait;

use super::parser::normalize;
use super::{
    ChangeKind, ChangeRecord, ContentStream, DirEntry, NodeKind, Properties, RevisionMetadata,
    RevisionSource,
};
use crate::errors::SourceError;
use crate::Revnum;

#[derive(Debug, Clone)]
enum Node {
    Directory { props: Properties },
    File { content: Vec<u8>, props: Properties },
}

impl Node {
    fn is_directory(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }

    fn props_mut(&mut self) -> &mut Properties {
        match self {
            Node::Directory { props } | Node::File { props, .. } => props,
        }
    }
}

type Tree = BTreeMap<String, Node>;

#[derive(Debug, Clone)]
struct Revision {
    tree: Tree,
    changes: BTreeMap<String, ChangeRecord>,
    metadata: RevisionMetadata,
}

/// A versioned tree held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    revisions: Vec<Revision>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    /// An empty repository at revision 0.
    pub fn new() -> Self {
        let mut tree = Tree::new();
        tree.insert("/".into(), Node::Directory { props: Properties::new() });
        Self {
            revisions: vec![Revision {
                tree,
                changes: BTreeMap::new(),
                metadata: RevisionMetadata::default(),
            }],
        }
    }

    pub fn youngest(&self) -> Revnum {
        self.revisions.len() as Revnum - 1
    }

    /// Start the next revision from the youngest tree.
    pub fn commit(&mut self, author: &str, epoch: i64, message: &str) -> MemoryCommit<'_> {
        let tree = self
            .revisions
            .last()
            .map(|r| r.tree.clone())
            .unwrap_or_default();
        MemoryCommit {
            source: self,
            tree,
            changes: BTreeMap::new(),
            metadata: RevisionMetadata {
                author: (!author.is_empty()).then(|| author.to_string()),
                epoch,
                message: message.as_bytes().to_vec(),
            },
            error: None,
        }
    }

    fn revision(&self, revision: Revnum) -> Result<&Revision, SourceError> {
        usize::try_from(revision)
            .ok()
            .and_then(|index| self.revisions.get(index))
            .ok_or(SourceError::RevisionNotFound(revision))
    }

    fn node(&self, revision: Revnum, path: &str) -> Result<&Node, SourceError> {
        self.revision(revision)?
            .tree
            .get(&normalize(path))
            .ok_or_else(|| SourceError::PathNotFound {
                path: path.to_string(),
                revision,
            })
    }
}

/// Builder for one revision of a [`MemorySource`].
pub struct MemoryCommit<'a> {
    source: &'a mut MemorySource,
    tree: Tree,
    changes: BTreeMap<String, ChangeRecord>,
    metadata: RevisionMetadata,
    error: Option<SourceError>,
}

impl MemoryCommit<'_> {
    pub fn mkdir(mut self, path: &str) -> Self {
        let path = normalize(path);
        self.ensure_parents(&path);
        if !self.tree.contains_key(&path) {
            self.tree.insert(path.clone(), Node::Directory { props: Properties::new() });
            self.record(&path, ChangeKind::Add, true, None);
        }
        self
    }

    /// Create or overwrite a file, creating missing parent directories.
    pub fn put(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        let path = normalize(path);
        self.ensure_parents(&path);
        let content = content.into();
        match self.tree.get_mut(&path) {
            Some(Node::File { content: existing, .. }) => {
                *existing = content;
                self.record(&path, ChangeKind::Modify, false, None);
            }
            Some(Node::Directory { .. }) => {
                self.fail(SourceError::ParseError(format!("{path} is a directory")));
            }
            None => {
                self.tree.insert(
                    path.clone(),
                    Node::File {
                        content,
                        props: Properties::new(),
                    },
                );
                self.record(&path, ChangeKind::Add, false, None);
            }
        }
        self
    }

    /// Copy `from@from_rev` (a file or a whole subtree) to `to`, replacing
    /// anything already at `to`.
    pub fn copy(mut self, from: &str, from_rev: Revnum, to: &str) -> Self {
        let from = normalize(from);
        let to = normalize(to);
        let source_tree = match self.source.revision(from_rev) {
            Ok(rev) => rev.tree.clone(),
            Err(e) => return self.failed(e),
        };
        let Some(root) = source_tree.get(&from) else {
            return self.failed(SourceError::PathNotFound {
                path: from,
                revision: from_rev,
            });
        };
        let is_directory = root.is_directory();

        if self.tree.contains_key(&to) {
            self.remove_subtree(&to);
        }
        self.ensure_parents(&to);
        self.tree.insert(to.clone(), root.clone());
        let prefix = format!("{from}/");
        for (key, node) in source_tree.range(prefix.clone()..) {
            let Some(tail) = key.strip_prefix(&prefix) else {
                break;
            };
            self.tree.insert(format!("{to}/{tail}"), node.clone());
        }
        self.record(&to, ChangeKind::Add, is_directory, Some((from, from_rev)));
        self
    }

    pub fn delete(mut self, path: &str) -> Self {
        let path = normalize(path);
        let Some(node) = self.tree.get(&path) else {
            let youngest = self.source.youngest();
            return self.failed(SourceError::PathNotFound {
                path,
                revision: youngest,
            });
        };
        let is_directory = node.is_directory();
        self.remove_subtree(&path);
        self.record(&path, ChangeKind::Delete, is_directory, None);
        self
    }

    pub fn set_prop(mut self, path: &str, name: &str, value: impl Into<Vec<u8>>) -> Self {
        let path = normalize(path);
        let Some(node) = self.tree.get_mut(&path) else {
            let youngest = self.source.youngest();
            return self.failed(SourceError::PathNotFound {
                path,
                revision: youngest,
            });
        };
        node.props_mut().insert(name.to_string(), value.into());
        let is_directory = node.is_directory();
        self.record(&path, ChangeKind::Modify, is_directory, None);
        if let Some(change) = self.changes.get_mut(&path) {
            change.properties_modified = true;
        }
        self
    }

    /// Commit the revision and return its number.
    pub fn done(self) -> Result<Revnum, SourceError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.source.revisions.push(Revision {
            tree: self.tree,
            changes: self.changes,
            metadata: self.metadata,
        });
        Ok(self.source.youngest())
    }

    fn ensure_parents(&mut self, path: &str) {
        let mut parent = String::new();
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            parent.push('/');
            parent.push_str(component);
            if !self.tree.contains_key(&parent) {
                self.tree.insert(parent.clone(), Node::Directory { props: Properties::new() });
                self.record(&parent.clone(), ChangeKind::Add, true, None);
            }
        }
    }

    fn remove_subtree(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.tree.retain(|key, _| key != path && !key.starts_with(&prefix));
        self.changes.retain(|key, _| !key.starts_with(&prefix));
    }

    fn record(&mut self, path: &str, kind: ChangeKind, is_directory: bool, copied_from: Option<(String, Revnum)>) {
        let previous = self.changes.get(path).map(|c| c.kind);
        let kind = match (previous, kind) {
            (None, kind) => kind,
            (Some(ChangeKind::Delete), ChangeKind::Add) => ChangeKind::Replace,
            (Some(ChangeKind::Add), ChangeKind::Modify) => ChangeKind::Add,
            (Some(ChangeKind::Replace), ChangeKind::Modify) => ChangeKind::Replace,
            (Some(ChangeKind::Add), ChangeKind::Delete) => {
                self.changes.remove(path);
                return;
            }
            (Some(_), kind) => kind,
        };
        let properties_modified = self
            .changes
            .get(path)
            .map(|c| c.properties_modified)
            .unwrap_or(false);
        let copied_from = match copied_from {
            Some(from) => Some(from),
            None if kind != ChangeKind::Delete => self.changes.get(path).and_then(|c| c.copied_from.clone()),
            None => None,
        };
        self.changes.insert(
            path.to_string(),
            ChangeRecord {
                path: path.to_string(),
                kind,
                is_directory,
                copied_from,
                properties_modified,
            },
        );
    }

    fn fail(&mut self, e: SourceError) {
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    fn failed(mut self, e: SourceError) -> Self {
        self.fail(e);
        self
    }
}

#[async_trait]
impl RevisionSource for MemorySource {
    async fn latest_revision(&self) -> Result<Revnum, SourceError> {
        Ok(self.youngest())
    }

    async fn changed_paths(&self, revision: Revnum) -> Result<Vec<ChangeRecord>, SourceError> {
        Ok(self.revision(revision)?.changes.values().cloned().collect())
    }

    async fn node_kind(&self, revision: Revnum, path: &str) -> Result<NodeKind, SourceError> {
        if revision < 1 {
            return Ok(NodeKind::None);
        }
        Ok(match self.revision(revision)?.tree.get(&normalize(path)) {
            None => NodeKind::None,
            Some(node) if node.is_directory() => NodeKind::Directory,
            Some(_) => NodeKind::File,
        })
    }

    async fn list_directory(&self, revision: Revnum, path: &str) -> Result<Vec<DirEntry>, SourceError> {
        let tree = &self.revision(revision)?.tree;
        let path = normalize(path);
        let prefix = if path == "/" { path.clone() } else { format!("{path}/") };
        let mut entries: Vec<DirEntry> = tree
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, node)| {
                let name = &key[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| DirEntry {
                    name: name.to_string(),
                    is_directory: node.is_directory(),
                })
            })
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn file_length(&self, revision: Revnum, path: &str) -> Result<u64, SourceError> {
        match self.node(revision, path)? {
            Node::File { content, .. } => Ok(content.len() as u64),
            Node::Directory { .. } => Err(SourceError::PathNotFound {
                path: path.to_string(),
                revision,
            }),
        }
    }

    async fn file_contents(&self, revision: Revnum, path: &str) -> Result<ContentStream, SourceError> {
        match self.node(revision, path)? {
            Node::File { content, .. } => Ok(Box::new(Cursor::new(content.clone()))),
            Node::Directory { .. } => Err(SourceError::PathNotFound {
                path: path.to_string(),
                revision,
            }),
        }
    }

    async fn properties(&self, revision: Revnum, path: &str) -> Result<Properties, SourceError> {
        Ok(match self.node(revision, path)? {
            Node::Directory { props } | Node::File { props, .. } => props.clone(),
        })
    }

    async fn revision_metadata(&self, revision: Revnum) -> Result<RevisionMetadata, SourceError> {
        Ok(self.revision(revision)?.metadata.clone())
    }
}
