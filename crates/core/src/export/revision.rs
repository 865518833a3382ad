//! Export of a single revision.
//!
//! Changed paths are visited in sorted order. Each path is matched against
//! every rule list; a matched path is ignored, recursed into or exported into
//! a transaction. Directories that no rule covers are walked when they were
//! copied or deleted, since their children do not appear in the change set.
//! Once every path is staged the transactions are committed.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::content::{self, ExportFuture};
use super::{CommitSummary, RevisionSummary};
use crate::config::ExportOptions;
use crate::errors::ExportError;
use crate::identity::IdentityMap;
use crate::ledger::{AnnotatedTag, Transaction};
use crate::registry::{Registry, Resolved};
use crate::rules::{find_match, split_path, MatchMask, MatchRule, PathSplit, RuleAction, RuleStats};
use crate::source::{ChangeKind, ChangeRecord, NodeKind, RevisionMetadata, RevisionSource};
use crate::Revnum;

/// Directories of the standard layout that never get an empty `.gitignore`.
const LAYOUT_DIRS: [&str; 3] = ["/trunk", "/branches", "/tags"];

/// A transaction keyed by the repository name the rule produced.
struct Staged {
    repository: String,
    txn: Transaction,
}

/// Where the source of a copy was exported.
struct CopySource {
    /// The copy source path, `/`-terminated for directories.
    previous: String,
    split: PathSplit,
    effective: String,
    revision: Revnum,
}

pub(super) struct RevisionRun<'a> {
    pub(super) revision: Revnum,
    pub(super) source: &'a dyn RevisionSource,
    pub(super) rule_lists: &'a [Vec<MatchRule>],
    pub(super) registry: &'a mut Registry,
    pub(super) identities: &'a IdentityMap,
    pub(super) options: &'a ExportOptions,
    pub(super) stats: &'a mut RuleStats,
    changes: BTreeMap<String, ChangeRecord>,
    transactions: Vec<Staged>,
    metadata: Option<RevisionMetadata>,
    need_commit: bool,
}

impl<'a> RevisionRun<'a> {
    pub(super) fn new(
        revision: Revnum,
        source: &'a dyn RevisionSource,
        rule_lists: &'a [Vec<MatchRule>],
        registry: &'a mut Registry,
        identities: &'a IdentityMap,
        options: &'a ExportOptions,
        stats: &'a mut RuleStats,
    ) -> Self {
        Self {
            revision,
            source,
            rule_lists,
            registry,
            identities,
            options,
            stats,
            changes: BTreeMap::new(),
            transactions: Vec::new(),
            metadata: None,
            need_commit: false,
        }
    }

    /// Stage every change of the revision.
    pub(super) async fn prepare(&mut self) -> Result<(), ExportError> {
        for change in self.source.changed_paths(self.revision).await? {
            if self.changes.contains_key(&change.path) {
                return Err(ExportError::DuplicatePath {
                    path: change.path,
                    revision: self.revision,
                });
            }
            self.changes.insert(change.path.clone(), change);
        }
        debug!(revision = self.revision, changes = self.changes.len(), "change set loaded");

        let changes: Vec<ChangeRecord> = self.changes.values().cloned().collect();
        for change in &changes {
            self.export_entry(change).await?;
        }
        Ok(())
    }

    pub(super) fn needs_commit(&self) -> bool {
        self.need_commit
    }

    async fn metadata(&mut self) -> Result<&RevisionMetadata, ExportError> {
        if self.metadata.is_none() {
            self.metadata = Some(self.source.revision_metadata(self.revision).await?);
        }
        Ok(self.metadata.get_or_insert_with(RevisionMetadata::default))
    }

    async fn export_entry(&mut self, change: &ChangeRecord) -> Result<(), ExportError> {
        let key = change.path.as_str();
        let revision = self.revision;

        if change.kind == ChangeKind::Reset {
            return Err(ExportError::UnexpectedReset {
                path: key.to_string(),
                revision,
            });
        }

        let copied_from = match change.kind {
            ChangeKind::Delete => None,
            _ => change.copied_from.clone(),
        };
        let copied = copied_from.is_some();
        let fresh = matches!(change.kind, ChangeKind::Add | ChangeKind::Modify);

        let mut is_dir = change.kind != ChangeKind::Delete && change.is_directory;
        if is_dir && change.kind == ChangeKind::Add && !copied && self.options.empty_dirs {
            if LAYOUT_DIRS.iter().any(|dir| key.ends_with(dir)) {
                return Ok(());
            }
            self.need_commit = true;
        } else if is_dir && fresh && !copied && self.options.svn_ignore {
            self.need_commit = true;
        } else if is_dir {
            match (change.kind, &copied_from) {
                (ChangeKind::Add | ChangeKind::Modify, None) => return Ok(()),
                (_, Some((from, from_rev))) => {
                    debug!(path = key, kind = %change.kind, from = %from, from_rev, "directory copied");
                }
                (_, None) => debug!(path = key, kind = %change.kind, "directory replaced"),
            }
        } else if change.kind == ChangeKind::Delete {
            is_dir = self.source.was_directory(revision - 1, key).await?;
        }

        let mut current = key.to_string();
        if is_dir {
            current.push('/');
        }

        let from = copied_from.as_ref().map(|(path, rev)| (path.as_str(), *rev));
        let mut handled = false;
        let rule_lists = self.rule_lists;
        for rules in rule_lists {
            if let Some(rule) = find_match(rules, revision, &current, MatchMask::NONE) {
                self.stats.record(rule);
                self.export_dispatch(key, change, from, &current, rule, rules).await?;
                handled = true;
            } else if is_dir && copied {
                debug!(path = %current, "copy with history, auto-recursing");
                self.recurse(key, change, from, rules).await?;
                handled = true;
            } else if is_dir && change.kind == ChangeKind::Delete {
                debug!(path = %current, "deleted, auto-recursing");
                self.recurse(key, change, from, rules).await?;
                handled = true;
            }
        }
        if handled {
            return Ok(());
        }

        if self.source.was_directory(revision - 1, key).await? {
            debug!(path = %current, "was a directory; ignoring");
        } else if change.kind == ChangeKind::Delete {
            debug!(path = %current, "deleted path that no rule covers; ignoring");
        } else {
            return Err(ExportError::UnmatchedPath {
                path: current,
                revision,
            });
        }
        Ok(())
    }

    fn export_dispatch<'s>(
        &'s mut self,
        key: &'s str,
        change: &'s ChangeRecord,
        from: Option<(&'s str, Revnum)>,
        current: &'s str,
        rule: &'a MatchRule,
        rules: &'a [MatchRule],
    ) -> ExportFuture<'s> {
        Box::pin(async move {
            match rule.action {
                RuleAction::Ignore => Ok(()),
                RuleAction::Recurse => {
                    debug!(revision = self.revision, path = current, rule = %rule, "recursing");
                    self.recurse(key, change, from, rules).await
                }
                RuleAction::Export => {
                    debug!(revision = self.revision, path = current, rule = %rule, "exporting");
                    match self.export_internal(key, change, from, current, rule, rules).await {
                        Ok(()) => Ok(()),
                        Err(ExportError::UnknownRepository { repository, .. })
                            if change.kind == ChangeKind::Delete =>
                        {
                            warn!(
                                revision = self.revision,
                                path = current,
                                %repository,
                                "deleting unknown path; auto-recursing"
                            );
                            self.recurse(key, change, from, rules).await
                        }
                        Err(e) => Err(e),
                    }
                }
            }
        })
    }

    /// The staged transaction for `branch` of `repository`, opened on first use.
    async fn staged(
        &mut self,
        repository: &str,
        resolved: &Resolved,
        branch: &str,
        svnprefix: &str,
    ) -> Result<usize, ExportError> {
        if let Some(index) = self
            .transactions
            .iter()
            .position(|s| s.repository == repository && s.txn.branch() == branch)
        {
            return Ok(index);
        }
        let ledger = self.registry.ledger(&resolved.repository).await?;
        let txn = ledger
            .new_transaction(branch, svnprefix, self.revision)
            .await?
            .with_prefix(resolved.prefix.clone());
        self.transactions.push(Staged {
            repository: repository.to_string(),
            txn,
        });
        Ok(self.transactions.len() - 1)
    }

    async fn copy_source(&self, from: &str, from_rev: Revnum, rules: &[MatchRule]) -> Result<Option<CopySource>, ExportError> {
        let mut previous = from.to_string();
        if self.source.was_directory(from_rev, from).await? {
            previous.push('/');
        }
        let Some(rule) = find_match(rules, from_rev, &previous, MatchMask::NO_IGNORE) else {
            warn!(
                revision = self.revision,
                from,
                from_rev,
                "copy source matches no rule; treating as a modification"
            );
            return Ok(None);
        };
        let Some(split) = split_path(rule, &previous) else {
            return Ok(None);
        };
        let effective = self
            .registry
            .effective(&split.repository)
            .unwrap_or_else(|| split.repository.clone());
        Ok(Some(CopySource {
            previous,
            split,
            effective,
            revision: from_rev,
        }))
    }

    async fn export_internal(
        &mut self,
        key: &str,
        change: &ChangeRecord,
        from: Option<(&str, Revnum)>,
        current: &str,
        rule: &MatchRule,
        rules: &[MatchRule],
    ) -> Result<(), ExportError> {
        self.need_commit = true;
        let revision = self.revision;
        let split = split_path(rule, current).ok_or_else(|| ExportError::UnmatchedPath {
            path: current.to_string(),
            revision,
        })?;

        let Some(resolved) = self.registry.resolve(&split.repository) else {
            return Err(ExportError::UnknownRepository {
                rule: rule.info(),
                repository: split.repository,
                path: current.to_string(),
                revision,
            });
        };

        let branch_root = current == split.svnprefix && split.path.is_empty();
        if change.kind == ChangeKind::Delete && branch_root && resolved.prefix.is_empty() {
            debug!(repository = %split.repository, branch = %split.branch, revision, "branch deleted");
            self.registry
                .ledger(&resolved.repository)
                .await?
                .delete_branch(&split.branch, revision);
            return Ok(());
        }

        let copy = match from {
            Some((from, from_rev)) => self.copy_source(from, from_rev, rules).await?,
            None => None,
        };

        if let (Some(copy), true) = (&copy, branch_root) {
            if copy.previous != copy.split.svnprefix {
                debug!(
                    path = current,
                    repository = %copy.split.repository,
                    branch = %copy.split.branch,
                    subdir = %copy.split.path,
                    "partial branch copy"
                );
            } else if copy.effective != resolved.repository {
                warn!(
                    path = current,
                    revision,
                    from_repository = %copy.split.repository,
                    from_branch = %copy.split.branch,
                    from_path = %copy.split.path,
                    from_rev = copy.revision,
                    "cross-repository copy"
                );
            } else if !copy.split.path.is_empty() {
                debug!(
                    path = current,
                    from = %copy.split.path,
                    "branch copy renames the base directory of all contents"
                );
            } else {
                if copy.split.branch == split.branch {
                    debug!(branch = %split.branch, revision, from_rev = copy.revision, "reseating branch to an earlier revision");
                } else {
                    debug!(repository = %split.repository, branch = %split.branch, from = %copy.split.branch, "branching");
                }
                self.registry.ledger(&resolved.repository).await?.create_branch(
                    &split.branch,
                    revision,
                    &copy.split.branch,
                    copy.revision,
                )?;

                if self.options.svn_branches {
                    let index = self.staged(&split.repository, &resolved, &split.branch, &split.svnprefix).await?;
                    let ledger = self.registry.ledger(&resolved.repository).await?;
                    let txn = &mut self.transactions[index].txn;
                    debug!(path = key, branch = %split.branch, "restaging the whole branch");
                    txn.delete_file(&split.path);
                    content::dump_dir(self.source, txn, ledger, revision, key, &split.path).await?;
                }

                if rule.annotate {
                    let metadata = self.metadata().await?.clone();
                    let tag = AnnotatedTag {
                        supporting_ref: split.branch.clone(),
                        svnprefix: split.svnprefix.clone(),
                        revision,
                        author: self.identities.committer(metadata.author.as_deref()),
                        epoch: metadata.epoch,
                        log: metadata.message,
                    };
                    self.registry
                        .ledger(&resolved.repository)
                        .await?
                        .create_annotated_tag(tag);
                }
                return Ok(());
            }
        }

        let index = self.staged(&split.repository, &resolved, &split.branch, &split.svnprefix).await?;
        let ledger = self.registry.ledger(&resolved.repository).await?;
        let txn = &mut self.transactions[index].txn;

        if let Some(copy) = &copy {
            if copy.effective == resolved.repository && copy.split.branch != split.branch {
                debug!(from = %copy.split.branch, to = %split.branch, from_rev = copy.revision, "copy from another branch");
                txn.note_copy_from_branch(ledger, &copy.split.branch, copy.revision);
            }
        }

        if change.kind == ChangeKind::Replace && copy.is_none() {
            debug!(branch = %split.branch, path = %split.path, "replaced with an empty path");
            txn.delete_file(&split.path);
        }

        if change.kind == ChangeKind::Delete {
            debug!(branch = %split.branch, path = %split.path, "delete");
            txn.delete_file(&split.path);
            return Ok(());
        }

        if !current.ends_with('/') {
            debug!(path = key, branch = %split.branch, target = %split.path, "add/change file");
            return content::dump_blob(self.source, txn, ledger, revision, key, &split.path).await;
        }

        debug!(path = key, branch = %split.branch, target = %split.path, "add/change directory");
        let properties_changed = match &copy {
            None => change.properties_modified,
            Some(_) => change.kind == ChangeKind::Add,
        };

        if properties_changed && self.options.propcheck {
            if let Err(e) = content::check_properties(self.source, revision, key).await {
                warn!(path = key, error = %e, "cannot check svn properties");
            }
        }

        let mut ignore = None;
        if properties_changed && self.options.svn_ignore {
            match self.source.properties(revision, key).await {
                Ok(mut props) => ignore = props.remove("svn:ignore"),
                Err(e) => warn!(path = key, error = %e, "cannot fetch svn properties"),
            }
        }

        txn.delete_file(&split.path);
        match ignore {
            Some(value) => {
                content::add_gitignore(self.source, txn, ledger, revision, key, &split.path, Some(value.as_slice())).await?;
            }
            None if self.options.empty_dirs => {
                if content::add_gitignore(self.source, txn, ledger, revision, key, &split.path, None).await? {
                    return Ok(());
                }
            }
            None => {}
        }
        content::dump_dir(self.source, txn, ledger, revision, key, &split.path).await
    }

    /// Re-dispatch the children of the directory `key`, in name order.
    fn recurse<'s>(
        &'s mut self,
        key: &'s str,
        change: &'s ChangeRecord,
        from: Option<(&'s str, Revnum)>,
        rules: &'a [MatchRule],
    ) -> ExportFuture<'s> {
        Box::pin(async move {
            let revision = self.revision;
            let root = if change.kind == ChangeKind::Delete {
                revision - 1
            } else {
                revision
            };

            match self.source.node_kind(root, key).await? {
                NodeKind::Directory => {}
                NodeKind::None => {
                    warn!(path = key, revision, "trying to recurse into a path that does not exist, ignoring");
                    return Ok(());
                }
                NodeKind::File => {
                    warn!(path = key, revision, "trying to recurse into a file, ignoring");
                    return Ok(());
                }
            }

            for entry in self.source.list_directory(root, key).await? {
                let child = content::child_path(key, &entry.name);
                let child_from = from.map(|(path, rev)| (content::child_path(path, &entry.name), rev));

                if self
                    .changes
                    .get(&child)
                    .is_some_and(|other| other.kind == ChangeKind::Add)
                {
                    debug!(path = %child, revision, "in the change set, deferring to that entry");
                    continue;
                }

                let mut current = child.clone();
                if entry.is_directory {
                    current.push('/');
                }
                let entry_from = child_from.as_ref().map(|(path, rev)| (path.as_str(), *rev));

                if let Some(rule) = find_match(rules, revision, &current, MatchMask::NONE) {
                    self.stats.record(rule);
                    self.export_dispatch(&child, change, entry_from, &current, rule, rules).await?;
                } else if entry.is_directory {
                    debug!(path = %current, revision, "no rule matches; auto-recursing");
                    self.recurse(&child, change, entry_from, rules).await?;
                }
            }
            Ok(())
        })
    }

    /// Commit every staged transaction. Pending branch resets of all
    /// repositories are written first. Transactions left over by a failure
    /// are released.
    pub(super) async fn commit(mut self) -> Result<RevisionSummary, ExportError> {
        let revision = self.revision;
        let result = self.commit_staged().await;
        self.abandon().await;
        let commits = result?;

        info!(revision, commits = commits.len(), "revision exported");
        Ok(RevisionSummary { revision, commits })
    }

    async fn commit_staged(&mut self) -> Result<Vec<CommitSummary>, ExportError> {
        let metadata = self.metadata().await?.clone();
        let author = self.identities.committer(metadata.author.as_deref());

        // Messages and marks for every commit of the revision are settled
        // before its first progress record reaches a sink, so a revision is
        // either logged completely or not at all.
        let mut needed: BTreeMap<String, u64> = BTreeMap::new();
        for Staged { txn, .. } in &mut self.transactions {
            let ledger = self.registry.ledger(txn.repository()).await?;
            txn.set_author(author.clone());
            txn.set_epoch(metadata.epoch);
            txn.set_log(metadata.message.clone());
            txn.prepare_message(ledger).await?;
            *needed.entry(txn.repository().to_string()).or_default() += 1;
        }
        for (name, count) in &needed {
            self.registry.ledger(name).await?.check_commit_marks(*count)?;
        }

        self.registry.flush_pending().await?;

        let mut commits = Vec::with_capacity(self.transactions.len());
        while let Some(next) = self.transactions.first() {
            let name = next.txn.repository().to_string();
            let ledger = self.registry.ledger(&name).await?;
            let Staged { repository, mut txn } = self.transactions.remove(0);
            let committed = txn.commit(ledger).await;
            let summary = CommitSummary {
                repository,
                branch: txn.branch().to_string(),
                prefix: txn.prefix().to_string(),
                modifications: txn.modification_count(),
                mark: 0,
            };
            ledger.finish_transaction(txn);
            commits.push(CommitSummary {
                mark: committed?,
                ..summary
            });
        }
        Ok(commits)
    }

    /// Give back transactions that will never be committed.
    pub(super) async fn abandon(mut self) {
        for Staged { txn, .. } in std::mem::take(&mut self.transactions) {
            if let Ok(ledger) = self.registry.ledger(txn.repository()).await {
                ledger.finish_transaction(txn);
            }
        }
    }
}
