//! Changes staged for one branch in one revision.

use tracing::{debug, warn};

use super::marks::NOTES_MARK;
use super::repository::BranchLedger;
use crate::errors::LedgerError;
use crate::fastimport::commands::{self, branch_ref};
use crate::source::ContentStream;
use crate::Revnum;

/// A pending commit. Every operation that touches the output borrows the
/// ledger of the repository the transaction was opened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    repository: String,
    prefix: String,
    branch: String,
    svnprefix: String,
    revision: Revnum,
    author: String,
    epoch: i64,
    log: Vec<u8>,
    /// The final commit message, once filtered.
    message: Option<Vec<u8>>,
    deleted: Vec<String>,
    modifications: Vec<u8>,
    merges: Vec<u64>,
}

impl Transaction {
    pub(super) fn new(repository: &str, branch: &str, svnprefix: &str, revision: Revnum) -> Self {
        Self {
            repository: repository.to_string(),
            prefix: String::new(),
            branch: branch.to_string(),
            svnprefix: svnprefix.to_string(),
            revision,
            author: String::new(),
            epoch: 0,
            log: Vec::new(),
            message: None,
            deleted: Vec::new(),
            modifications: Vec::new(),
            merges: Vec::new(),
        }
    }

    /// Prepend `prefix` to every path this transaction touches.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Name of the direct repository.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn svnprefix(&self) -> &str {
        &self.svnprefix
    }

    pub fn revision(&self) -> Revnum {
        self.revision
    }

    pub fn merges(&self) -> &[u64] {
        &self.merges
    }

    pub fn deleted(&self) -> &[String] {
        &self.deleted
    }

    /// Number of staged deletions and modifications.
    pub fn modification_count(&self) -> usize {
        self.deleted.len() + self.modifications.iter().filter(|&&b| b == b'\n').count()
    }

    pub fn set_author(&mut self, author: impl Into<String>) {
        self.author = author.into();
    }

    pub fn set_epoch(&mut self, epoch: i64) {
        self.epoch = epoch;
    }

    pub fn set_log(&mut self, log: impl Into<Vec<u8>>) {
        self.log = log.into();
        self.message = None;
    }

    /// Stage the removal of `path`. An empty path removes everything.
    pub fn delete_file(&mut self, path: &str) {
        let mut full = format!("{}{}", self.prefix, path);
        if full.ends_with('/') {
            full.pop();
        }
        self.deleted.push(full);
    }

    /// Stage `path` with the next `length` bytes of `content` as a blob.
    pub async fn add_file(
        &mut self,
        ledger: &mut BranchLedger,
        path: &str,
        mode: u32,
        length: u64,
        content: &mut ContentStream,
    ) -> Result<(), LedgerError> {
        let mark = ledger
            .marks
            .next_file_mark()
            .ok_or_else(|| LedgerError::MarksExhausted(ledger.name.clone()))?;

        let full = format!("{}{}", self.prefix, path);
        self.modifications
            .extend_from_slice(commands::file_modify(mode, mark, &full).as_bytes());

        let sink = ledger.sink().await?;
        if sink.accepts_blobs() {
            sink.write_all(commands::blob_header(mark, length).as_bytes())
                .await?;
            sink.write_stream(length, content, &full).await?;
            sink.write_all(b"\n").await?;
        }
        Ok(())
    }

    /// Record that files were copied from `from` at `from_revision`, making
    /// that commit a merge parent.
    pub fn note_copy_from_branch(&mut self, ledger: &BranchLedger, from: &str, from_revision: Revnum) {
        if from == self.branch {
            warn!(
                repository = %ledger.name,
                branch = %self.branch,
                revision = self.revision,
                "cannot merge inside a branch"
            );
            return;
        }

        let mut desc = String::new();
        match ledger.mark_from(from, from_revision, &mut desc) {
            None => warn!(
                repository = %ledger.name,
                branch = %self.branch,
                from,
                "copying from a branch that does not exist, assuming the files exist"
            ),
            Some(0) => warn!(
                repository = %ledger.name,
                branch = %self.branch,
                from,
                from_revision,
                "copying from an unknown revision, assuming the files exist"
            ),
            Some(mark) => {
                warn!(
                    repository = %ledger.name,
                    branch = %self.branch,
                    from,
                    from_revision,
                    "branch has some files copied from another branch"
                );
                if self.merges.contains(&mark) {
                    debug!(mark, "merge point already recorded");
                } else {
                    debug!(mark, %desc, "adding merge point");
                    self.merges.push(mark);
                }
            }
        }
    }

    /// Build the final commit message: the log, the metadata line and the
    /// message filter. Nothing is written to the sink.
    pub async fn prepare_message(&mut self, ledger: &BranchLedger) -> Result<(), LedgerError> {
        let mut message = self.log.clone();
        commands::terminate(&mut message);
        if ledger.options.add_metadata {
            message.push(b'\n');
            message.extend_from_slice(
                commands::metadata_message(&self.svnprefix, self.revision, None).as_bytes(),
            );
        }
        if let Some(filter) = &ledger.filter {
            message = filter.apply(&message).await?;
        }
        self.message = Some(message);
        Ok(())
    }

    /// Write the commit and return its mark.
    pub async fn commit(&mut self, ledger: &mut BranchLedger) -> Result<u64, LedgerError> {
        if self.message.is_none() {
            self.prepare_message(ledger).await?;
        }
        let message = self.message.clone().unwrap_or_default();
        let mark = ledger
            .marks
            .next_commit_mark()
            .ok_or_else(|| LedgerError::MarksExhausted(ledger.name.clone()))?;

        let branch = ledger.branches.entry(self.branch.clone()).or_default();
        let parent = if branch.has_tip() {
            branch.last_mark()
        } else {
            warn!(
                repository = %ledger.name,
                branch = %self.branch,
                revision = self.revision,
                "branch does not exist at this revision, did you resume from the wrong revision?"
            );
            branch.created = self.revision;
            0
        };
        branch.record(self.revision, mark);

        let mut out = commands::commit(
            &branch_ref(&self.branch),
            mark,
            &self.author,
            self.epoch,
            &message,
        );

        let mut desc = String::new();
        for merge in ledger.merge_policy.select(&self.log, parent, &self.merges) {
            out.extend_from_slice(commands::merge(merge).as_bytes());
            desc.push_str(&format!(" :{merge}"));
        }

        if self.deleted.iter().any(String::is_empty) {
            out.extend_from_slice(commands::DELETE_ALL);
        } else {
            for path in &self.deleted {
                out.extend_from_slice(commands::file_delete(path).as_bytes());
            }
        }
        out.extend_from_slice(&self.modifications);

        let comment = if desc.is_empty() {
            String::new()
        } else {
            format!("merge from{desc}")
        };
        out.push(b'\n');

        ledger.sink().await?.write_all(&out).await?;
        debug!(
            repository = %ledger.name,
            branch = %self.branch,
            revision = self.revision,
            mark,
            modifications = self.modification_count(),
            "committed"
        );

        if ledger.options.add_metadata_notes {
            let note = commands::metadata_message(&self.svnprefix, self.revision, None);
            self.commit_note(ledger, note.as_bytes(), false).await?;
        }

        // The record goes last: a resumed run trusts everything before it.
        let record = commands::revision_progress(self.revision, &self.branch, mark, &comment);
        ledger.sink().await?.write_all(record.as_bytes()).await?;
        ledger.sink().await?.flush().await?;
        Ok(mark)
    }

    /// Attach `text` as a note to the branch tip, optionally after the
    /// branch's existing note.
    pub async fn commit_note(
        &self,
        ledger: &mut BranchLedger,
        text: &[u8],
        append: bool,
    ) -> Result<(), LedgerError> {
        let target = branch_ref(&self.branch);
        let existing = ledger
            .branches
            .get(&self.branch)
            .map(|b| b.note.as_slice())
            .filter(|note| append && !note.is_empty());

        let (body, appending) = match existing {
            Some(note) => ([note, text].concat(), true),
            None => (text.to_vec(), false),
        };

        let data = commands::note_commit(NOTES_MARK, &self.author, self.epoch, &target, &body, appending);
        ledger.sink().await?.write_all(&data).await?;

        if let Some(branch) = ledger.branches.get_mut(&self.branch) {
            branch.note = body;
        }
        Ok(())
    }
}
