//! Branch bookkeeping and stream output for one direct repository.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::branch::{Branch, Lookup};
use super::marks::{MarkAllocator, NOTES_MARK};
use super::merge::MergePolicy;
use super::transaction::Transaction;
use crate::config::ExportOptions;
use crate::errors::LedgerError;
use crate::fastimport::commands::{self, branch_ref, NOTES_REF, NULL_SHA};
use crate::fastimport::{MessageFilter, OutputLayout, Sink, SinkFactory};
use crate::Revnum;

/// A tag waiting for the end of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedTag {
    pub supporting_ref: String,
    pub svnprefix: String,
    pub revision: Revnum,
    pub author: String,
    pub epoch: i64,
    pub log: Vec<u8>,
}

/// State of one output repository that owns its importer.
pub struct BranchLedger {
    pub(super) name: String,
    pub(super) options: Arc<ExportOptions>,
    declared: Vec<String>,
    pub(super) branches: BTreeMap<String, Branch>,
    tags: BTreeMap<String, AnnotatedTag>,
    pub(super) marks: MarkAllocator,
    reset_buffer: Vec<u8>,
    deleted_buffer: Vec<u8>,
    commit_count: u64,
    outstanding: usize,
    factory: Arc<dyn SinkFactory>,
    sink: Option<Box<dyn Sink>>,
    pub(super) filter: Option<MessageFilter>,
    pub(super) merge_policy: Arc<dyn MergePolicy>,
}

impl fmt::Debug for BranchLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchLedger")
            .field("name", &self.name)
            .field("branches", &self.branches.len())
            .field("tags", &self.tags.len())
            .field("outstanding", &self.outstanding)
            .field("sink_open", &self.sink.is_some())
            .finish()
    }
}

impl BranchLedger {
    /// `declared` branches exist from revision 1, as does `master`.
    pub fn new(
        name: impl Into<String>,
        declared: &[String],
        options: Arc<ExportOptions>,
        factory: Arc<dyn SinkFactory>,
        merge_policy: Arc<dyn MergePolicy>,
    ) -> Self {
        let filter = options.msg_filter.as_deref().map(MessageFilter::new);
        let mut ledger = Self {
            name: name.into(),
            options,
            declared: declared.to_vec(),
            branches: BTreeMap::new(),
            tags: BTreeMap::new(),
            marks: MarkAllocator::new(),
            reset_buffer: Vec::new(),
            deleted_buffer: Vec::new(),
            commit_count: 0,
            outstanding: 0,
            factory,
            sink: None,
            filter,
            merge_policy,
        };
        ledger.reset_history();
        ledger
    }

    /// Use a different mark allocator (small sentinels in tests).
    pub fn with_marks(mut self, marks: MarkAllocator) -> Self {
        self.marks = marks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &OutputLayout {
        self.factory.layout()
    }

    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.get(name)
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    pub fn branches(&self) -> impl Iterator<Item = (&String, &Branch)> {
        self.branches.iter()
    }

    pub fn tags(&self) -> &BTreeMap<String, AnnotatedTag> {
        &self.tags
    }

    pub fn last_commit_mark(&self) -> u64 {
        self.marks.last_commit_mark()
    }

    pub fn outstanding_transactions(&self) -> usize {
        self.outstanding
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Whether branch resets or deletions are waiting to be written.
    pub fn has_pending(&self) -> bool {
        !self.reset_buffer.is_empty() || !self.deleted_buffer.is_empty()
    }

    /// Forget every branch except the declared ones.
    pub(super) fn reset_history(&mut self) {
        self.branches.clear();
        for name in self.declared.iter().map(String::as_str).chain(["master"]) {
            self.branches.insert(name.to_string(), Branch::declared());
        }
        self.marks = MarkAllocator::with_sentinel(self.marks.sentinel());
    }

    /// The running sink, started on first use. A fresh sink is told about
    /// every existing branch tip.
    pub(super) async fn sink(&mut self) -> Result<&mut dyn Sink, LedgerError> {
        let sink = match self.sink.take() {
            Some(sink) => sink,
            None => self.open_sink().await?,
        };
        Ok(&mut **self.sink.insert(sink))
    }

    async fn open_sink(&self) -> Result<Box<dyn Sink>, LedgerError> {
        let mut sink = self.factory.open(&self.name).await?;

        let mut reloaded = false;
        for (name, branch) in &self.branches {
            let mark = branch.last_mark();
            if mark == 0 {
                continue;
            }
            sink.write_all(commands::reload(&branch_ref(name), mark).as_bytes())
                .await?;
            reloaded = true;
        }
        if reloaded && self.options.add_metadata_notes {
            sink.write_all(commands::reset(NOTES_REF, &format!(":{NOTES_MARK}")).as_bytes())
                .await?;
        }
        debug!(repository = %self.name, reloaded, "sink started");
        Ok(sink)
    }

    pub async fn checkpoint(&mut self) -> Result<(), LedgerError> {
        self.sink().await?.checkpoint().await?;
        Ok(())
    }

    /// Close the sink if it is running. A later write starts a new one.
    pub async fn close(&mut self) -> Result<(), LedgerError> {
        if let Some(mut sink) = self.sink.take() {
            sink.close().await?;
        }
        Ok(())
    }

    /// Fail if a transaction was never finished.
    pub fn ensure_idle(&self) -> Result<(), LedgerError> {
        if self.outstanding != 0 {
            return Err(LedgerError::OutstandingTransactions {
                repository: self.name.clone(),
                count: self.outstanding,
            });
        }
        Ok(())
    }

    /// Fail unless `count` more commits fit before the marks run out.
    pub fn check_commit_marks(&self, count: u64) -> Result<(), LedgerError> {
        if self.marks.available_commit_marks() < count {
            return Err(LedgerError::MarksExhausted(self.name.clone()));
        }
        Ok(())
    }

    /// Mark of `branch` at `revision`: `None` if the branch is unknown,
    /// `Some(0)` if the revision predates its history. Appends a description
    /// of the lookup to `desc`.
    pub fn mark_from(&self, branch: &str, revision: Revnum, desc: &mut String) -> Option<u64> {
        match self.branches.get(branch)?.lookup(revision) {
            Lookup::Unknown => None,
            Lookup::Before => Some(0),
            Lookup::At { mark, revision: closest } => {
                desc.push_str(&format!(" at r{revision}"));
                if closest != revision {
                    desc.push_str(&format!(" => r{closest}"));
                }
                Some(mark)
            }
        }
    }

    /// Start `branch` at `revision` from the state of `from` at `from_revision`.
    pub fn create_branch(
        &mut self,
        branch: &str,
        revision: Revnum,
        from: &str,
        from_revision: Revnum,
    ) -> Result<(), LedgerError> {
        let mut desc = format!("from branch {from}");
        let mark = self
            .mark_from(from, from_revision, &mut desc)
            .ok_or_else(|| LedgerError::UnknownSourceBranch {
                repository: self.name.clone(),
                branch: branch.to_string(),
                from: from.to_string(),
            })?;

        let reset_to = if mark == 0 {
            warn!(
                repository = %self.name,
                branch,
                from,
                "branching from a branch with no exported commits, creating it from the ref"
            );
            desc.push_str(", deleted/unknown");
            branch_ref(from)
        } else {
            format!(":{mark}")
        };

        debug!(repository = %self.name, branch, from, from_revision, %desc, "creating branch");
        let note = self
            .branches
            .get(from)
            .map(|b| b.note.clone())
            .unwrap_or_default();
        self.branches.entry(branch.to_string()).or_default().note = note;

        self.reset_branch(branch, revision, mark, &reset_to, &desc);
        Ok(())
    }

    pub fn delete_branch(&mut self, branch: &str, revision: Revnum) {
        self.reset_branch(branch, revision, 0, NULL_SHA, "delete");
    }

    fn reset_branch(&mut self, branch: &str, revision: Revnum, mark: u64, reset_to: &str, comment: &str) {
        let git_ref = branch_ref(branch);
        let deleting = comment == "delete";
        let entry = self.branches.entry(branch.to_string()).or_default();

        let mut cmd = String::new();
        if entry.created != 0 && entry.created != revision && entry.last_mark() != 0 {
            let backup = match git_ref.strip_prefix("refs/heads/") {
                Some(head) if deleting => format!("refs/tags/backups/{head}@{revision}"),
                _ => format!("refs/backups/r{revision}{}", &git_ref[4..]),
            };
            warn!(repository = %self.name, branch, %backup, "backing up branch");
            cmd.push_str(&commands::reset(&backup, &git_ref));
        }

        entry.created = revision;
        entry.record(revision, mark);

        cmd.push_str(&commands::reset(&git_ref, reset_to));
        cmd.push_str(&commands::revision_progress(revision, branch, mark, comment));
        if deleting {
            self.deleted_buffer.extend_from_slice(cmd.as_bytes());
        } else {
            self.reset_buffer.extend_from_slice(cmd.as_bytes());
        }
    }

    /// Write buffered branch deletions, then branch resets.
    pub async fn flush_pending(&mut self) -> Result<(), LedgerError> {
        if self.deleted_buffer.is_empty() && self.reset_buffer.is_empty() {
            return Ok(());
        }
        let mut data = std::mem::take(&mut self.deleted_buffer);
        data.append(&mut self.reset_buffer);
        self.sink().await?.write_all(&data).await?;
        Ok(())
    }

    /// Open a transaction for `branch` in `revision`.
    pub async fn new_transaction(
        &mut self,
        branch: &str,
        svnprefix: &str,
        revision: Revnum,
    ) -> Result<Transaction, LedgerError> {
        if !self.branches.contains_key(branch) {
            warn!(
                repository = %self.name,
                branch,
                "transaction on a branch that is not known yet, it will be created"
            );
        }

        self.commit_count += 1;
        if self.commit_count % self.options.commit_interval.max(1) == 0 {
            self.checkpoint().await?;
        }
        self.outstanding += 1;
        Ok(Transaction::new(&self.name, branch, svnprefix, revision))
    }

    /// Release a committed (or abandoned) transaction.
    pub fn finish_transaction(&mut self, txn: Transaction) {
        debug_assert_eq!(txn.repository(), self.name);
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 {
            self.marks.reset_file_marks();
        }
    }

    /// Queue an annotated tag; a later tag of the same name replaces it.
    pub fn create_annotated_tag(&mut self, tag: AnnotatedTag) {
        let name = tag
            .supporting_ref
            .strip_prefix("refs/tags/")
            .unwrap_or(&tag.supporting_ref)
            .to_string();
        if self.tags.contains_key(&name) {
            info!(repository = %self.name, tag = %name, "re-creating annotated tag");
        } else {
            info!(repository = %self.name, tag = %name, git_ref = %tag.supporting_ref, "creating annotated tag");
        }
        self.tags.insert(name, tag);
    }

    /// Emit every queued tag now that all commit marks are final.
    pub async fn finalize_tags(&mut self) -> Result<(), LedgerError> {
        if self.tags.is_empty() {
            return Ok(());
        }
        info!(repository = %self.name, count = self.tags.len(), "finalising tags");

        // A tag leaves the queue only once it is written, so a failed run
        // still holds the rest.
        let names: Vec<String> = self.tags.keys().cloned().collect();
        for name in names {
            let Some(tag) = self.tags.get(&name).cloned() else {
                continue;
            };
            let mut message = tag.log.clone();
            commands::terminate(&mut message);
            let metadata = commands::metadata_message(&tag.svnprefix, tag.revision, Some(&name));
            if self.options.add_metadata {
                message.push(b'\n');
                message.extend_from_slice(metadata.as_bytes());
            }

            let from = branch_ref(&tag.supporting_ref);
            let data = commands::tag(&name, &from, &tag.author, tag.epoch, &message);
            self.sink().await?.write_all(&data).await?;

            if self.options.add_metadata_notes {
                let mut txn = self
                    .new_transaction(&tag.supporting_ref, &tag.svnprefix, tag.revision)
                    .await?;
                txn.set_author(tag.author.clone());
                txn.set_epoch(tag.epoch);
                let noted = txn.commit_note(self, metadata.as_bytes(), true).await;
                self.finish_transaction(txn);
                noted?;
            }

            self.sink()
                .await?
                .write_all(commands::tag_progress(tag.revision, &name).as_bytes())
                .await?;
            self.tags.remove(&name);
            debug!(repository = %self.name, tag = %name, "tag written");
        }

        self.sink().await?.flush().await?;
        Ok(())
    }
}
