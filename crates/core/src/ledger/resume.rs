//! Incremental resume from the marks file and progress log of a previous run.

use std::path::Path;

use tracing::{debug, error, info, warn};

use super::repository::BranchLedger;
use crate::config::OutputMode;
use crate::errors::ResumeError;
use crate::fastimport::commands;
use crate::Revnum;

/// One `progress SVN r<rev> branch <name> = :<mark>` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub revision: Revnum,
    pub branch: String,
    pub mark: u64,
}

/// Parse a log line; anything after `#` is ignored.
pub fn parse_progress(line: &str) -> Option<ProgressEntry> {
    let line = line.split('#').next().unwrap_or("").trim();
    let rest = line.strip_prefix("progress SVN r")?;
    let (revision, rest) = rest.split_once(" branch ")?;
    let (branch, mark) = rest.rsplit_once(" = :")?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(revision) || !digits(mark) {
        return None;
    }
    Some(ProgressEntry {
        revision: revision.parse().ok()?,
        branch: branch.to_string(),
        mark: mark.parse().ok()?,
    })
}

/// Parse a `progress SVN tag <name> at r<rev>` record into the tag's
/// revision and name.
pub fn parse_tag_progress(line: &str) -> Option<(Revnum, String)> {
    let rest = line.trim().strip_prefix("progress SVN tag ")?;
    let (name, revision) = rest.rsplit_once(" at r")?;
    if name.is_empty() || revision.is_empty() || !revision.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((revision.parse().ok()?, name.to_string()))
}

/// The highest mark `m` such that marks `1..=m` are all present, in order,
/// in a marks file. Duplicates, descending ids or unparsable lines make the
/// whole file untrusted.
pub fn scan_marks(contents: &str, file: &str) -> u64 {
    let mut prev = 0u64;
    for (idx, line) in contents.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let mark = line
            .strip_prefix(':')
            .and_then(|rest| rest.split_once(' '))
            .and_then(|(id, _)| id.parse::<u64>().ok())
            .unwrap_or(0);

        if mark == 0 {
            error!(file, line = idx + 1, "marks file corrupt?");
            return 0;
        }
        if mark == prev {
            error!(file, line = idx + 1, mark, "marks file has duplicates");
            return 0;
        }
        if mark < prev {
            error!(file, line = idx + 1, mark, "marks file not sorted");
            return 0;
        }
        if mark > prev + 1 {
            break;
        }
        prev = mark;
    }
    prev
}

/// [`scan_marks`] on a file; a missing file trusts nothing.
pub async fn last_valid_mark(path: &Path) -> u64 {
    match tokio::fs::read(path).await {
        Ok(data) => scan_marks(&String::from_utf8_lossy(&data), &path.display().to_string()),
        Err(_) => 0,
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ResumeError + '_ {
    move |source| ResumeError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn truncate(path: &Path, len: usize) -> Result<(), ResumeError> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(io_error(path))?;
    file.set_len(len as u64).await.map_err(io_error(path))
}

async fn remove_if_exists(path: &Path) -> Result<(), ResumeError> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_error(path)(e)),
        _ => Ok(()),
    }
}

impl BranchLedger {
    /// Rebuild branch histories from the progress log of an earlier run.
    ///
    /// Entries at or after `cutoff` are dropped. An entry whose mark the
    /// importer never persisted means the earlier run was interrupted: the
    /// cutoff moves back to that entry's revision. When anything is dropped
    /// the log is backed up to `<log>.old` and truncated before the first
    /// dropped entry. A stream file is always cut back to its last kept
    /// record, which also removes a revision that was only partly written.
    ///
    /// Returns the first revision this repository still needs.
    pub async fn setup_incremental(&mut self, cutoff: &mut Revnum) -> Result<Revnum, ResumeError> {
        self.reset_history();

        let log = self.layout().log_file(self.name());
        let backup = self.layout().backup_file(self.name());
        let data = match tokio::fs::read(&log).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
            Err(e) => return Err(io_error(&log)(e)),
        };

        // Without an importer the stream file is the only record, so every
        // mark it holds was written.
        let last_valid = match self.layout().mode {
            OutputMode::FastImport => last_valid_mark(&self.layout().marks_file(self.name())).await,
            OutputMode::Dump | OutputMode::DryRun => u64::MAX,
        };
        debug!(repository = %self.name, last_valid, "replaying progress log");

        let mut last_revision: Revnum = 0;
        let mut pos = 0usize;
        let mut kept_end = 0usize;
        let mut truncate_at = None;

        for raw in data.split_inclusive(|&b| b == b'\n') {
            let start = pos;
            pos += raw.len();
            // the blank line closing a kept record belongs to it
            if raw == b"\n" && kept_end == start {
                kept_end = pos;
                continue;
            }
            let line = String::from_utf8_lossy(raw);
            if let Some((revision, tag)) = parse_tag_progress(&line) {
                if revision >= *cutoff {
                    truncate_at = Some(start);
                    break;
                }
                debug!(repository = %self.name, tag = %tag, revision, "tag already written");
                kept_end = pos;
                continue;
            }
            let Some(entry) = parse_progress(&line) else {
                continue;
            };

            if entry.revision >= *cutoff {
                truncate_at = Some(start);
                break;
            }
            if entry.revision < last_revision {
                warn!(
                    repository = %self.name,
                    previous = last_revision,
                    revision = entry.revision,
                    "revision numbers are not monotonic"
                );
            }
            if entry.mark > last_valid {
                warn!(
                    repository = %self.name,
                    revision = entry.revision,
                    mark = entry.mark,
                    "unknown commit mark found: rewinding -- did you hit Ctrl-C?"
                );
                *cutoff = entry.revision;
                truncate_at = Some(start);
                break;
            }

            last_revision = entry.revision;
            kept_end = pos;
            if self.marks.last_commit_mark() < entry.mark {
                self.marks.restore_commit_mark(entry.mark);
            }
            let branch = self.branches.entry(entry.branch).or_default();
            if entry.mark == 0 || !branch.has_tip() {
                branch.created = entry.revision;
            }
            branch.record(entry.revision, entry.mark);
        }

        let file_mode = matches!(self.layout().mode, OutputMode::Dump | OutputMode::DryRun);
        let Some(offset) = truncate_at else {
            let next = last_revision + 1;
            if next == *cutoff {
                remove_if_exists(&backup).await?;
            }
            if file_mode && kept_end < data.len() {
                self.drop_unrecorded_tail(&log, &backup, &data[kept_end..], kept_end)
                    .await?;
            }
            return Ok(next);
        };

        // A stream file also holds the commands of the dropped entry ahead
        // of its progress line.
        let offset = if file_mode { kept_end } else { offset };

        remove_if_exists(&backup).await?;
        tokio::fs::copy(&log, &backup).await.map_err(io_error(&log))?;
        truncate(&log, offset).await?;
        info!(repository = %self.name, cutoff = *cutoff, "truncating history to revision");
        Ok(*cutoff)
    }

    /// Cut a stream file back to its last record. Checkpoints left by a
    /// clean close go silently; anything else was written by a run that
    /// died inside a revision and is kept in the backup.
    async fn drop_unrecorded_tail(
        &self,
        log: &Path,
        backup: &Path,
        tail: &[u8],
        offset: usize,
    ) -> Result<(), ResumeError> {
        let trailer = commands::checkpoint();
        let mut rest = tail;
        while let Some(stripped) = rest.strip_prefix(trailer.as_slice()) {
            rest = stripped;
        }
        if rest.is_empty() {
            debug!(repository = %self.name, "dropping closing checkpoint");
        } else {
            warn!(
                repository = %self.name,
                bytes = tail.len(),
                "stream has commands after its last record, discarding them"
            );
            remove_if_exists(backup).await?;
            tokio::fs::copy(log, backup).await.map_err(io_error(log))?;
        }
        truncate(log, offset).await
    }

    /// Put back the log saved by the last truncation.
    pub async fn restore_log(&self) -> Result<(), ResumeError> {
        let log = self.layout().log_file(self.name());
        let backup = self.layout().backup_file(self.name());
        if !backup.exists() {
            return Ok(());
        }
        remove_if_exists(&log).await?;
        tokio::fs::rename(&backup, &log).await.map_err(io_error(&backup))?;
        info!(repository = %self.name, "restored progress log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ExportOptions;
    use crate::fastimport::{FileSinkFactory, SinkFactory};
    use crate::ledger::merge::SignatureMergePolicy;

    fn ledger(dir: &Path) -> BranchLedger {
        let factory: Arc<dyn SinkFactory> = Arc::new(FileSinkFactory::new(dir, OutputMode::FastImport));
        BranchLedger::new(
            "lib",
            &[],
            Arc::new(ExportOptions::default()),
            factory,
            Arc::new(SignatureMergePolicy::default()),
        )
    }

    fn dump_ledger(dir: &Path) -> BranchLedger {
        let factory: Arc<dyn SinkFactory> = Arc::new(FileSinkFactory::new(dir, OutputMode::Dump));
        BranchLedger::new(
            "lib",
            &[],
            Arc::new(ExportOptions::default()),
            factory,
            Arc::new(SignatureMergePolicy::default()),
        )
    }

    fn write_marks(dir: &Path, upto: u64) {
        std::fs::create_dir_all(dir.join("lib")).unwrap();
        let mut text: String = (1..=upto).map(|m| format!(":{m} {:040x}\n", m)).collect();
        text.push_str(":18446744073709551614 0123456789012345678901234567890123456789\n");
        std::fs::write(dir.join("lib/marks-lib"), text).unwrap();
    }

    const LOG: &str = "\
progress SVN r1 branch master = :1
progress SVN r2 branch master = :2
progress Branch refs/heads/master reloaded
progress SVN r3 branch stable = :2 # from branch master at r2
progress SVN r4 branch stable = :3 # merge from :2
progress SVN r5 branch master = :4
";

    #[test]
    fn test_scan_marks() {
        assert_eq!(scan_marks(":1 a\n:2 b\n:3 c\n", "m"), 3);
        assert_eq!(scan_marks(":1 a\n:2 b\n:9 c\n", "m"), 2);
        assert_eq!(scan_marks(":1 a\n:1 b\n", "m"), 0);
        assert_eq!(scan_marks(":2 a\n:1 b\n", "m"), 0);
        assert_eq!(scan_marks("garbage\n", "m"), 0);
        assert_eq!(scan_marks("", "m"), 0);
    }

    #[test]
    fn test_parse_progress() {
        let entry = parse_progress("progress SVN r12 branch release/1.0 = :40 # delete\n").unwrap();
        assert_eq!(entry.revision, 12);
        assert_eq!(entry.branch, "release/1.0");
        assert_eq!(entry.mark, 40);
        assert!(parse_progress("progress Branch refs/heads/x reloaded").is_none());
        assert!(parse_progress("  progress SVN r1 branch a = :1  ").is_some());
    }

    #[tokio::test]
    async fn test_no_log_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger(dir.path());
        let mut cutoff = Revnum::MAX;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 1);
        assert_eq!(cutoff, Revnum::MAX);
    }

    #[tokio::test]
    async fn test_complete_log_replays_history() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log-lib"), LOG).unwrap();
        write_marks(dir.path(), 4);

        let mut ledger = ledger(dir.path());
        let mut cutoff = Revnum::MAX;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 6);
        assert_eq!(cutoff, Revnum::MAX);
        assert_eq!(ledger.last_commit_mark(), 4);

        let master = ledger.branch("master").unwrap();
        assert_eq!(master.commits(), &[1, 2, 5]);
        assert_eq!(master.marks(), &[1, 2, 4]);
        let stable = ledger.branch("stable").unwrap();
        assert_eq!(stable.created, 3);
        assert_eq!(stable.marks(), &[2, 3]);
        assert!(!dir.path().join("log-lib.old").exists());
    }

    #[tokio::test]
    async fn test_interrupted_run_rewinds_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log-lib"), LOG).unwrap();
        write_marks(dir.path(), 2);

        let mut ledger = ledger(dir.path());
        let mut cutoff = Revnum::MAX;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 4);
        assert_eq!(cutoff, 4);

        let log = std::fs::read_to_string(dir.path().join("log-lib")).unwrap();
        assert!(log.ends_with("progress SVN r3 branch stable = :2 # from branch master at r2\n"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("log-lib.old")).unwrap(),
            LOG
        );

        // running again is idempotent
        let mut again = Revnum::MAX;
        assert_eq!(ledger.setup_incremental(&mut again).await.unwrap(), 4);
        assert_eq!(ledger.branch("master").unwrap().marks(), &[1, 2]);

        ledger.restore_log().await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("log-lib")).unwrap(), LOG);
    }

    #[tokio::test]
    async fn test_requested_cutoff_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log-lib"), LOG).unwrap();
        write_marks(dir.path(), 4);

        let mut ledger = ledger(dir.path());
        let mut cutoff = 3;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 3);
        assert_eq!(cutoff, 3);
        assert_eq!(ledger.last_commit_mark(), 2);
        assert!(ledger.branch("stable").is_none());
        let log = std::fs::read_to_string(dir.path().join("log-lib")).unwrap();
        assert!(log.ends_with("progress Branch refs/heads/master reloaded\n"));
    }

    #[tokio::test]
    async fn test_dump_stream_needs_no_marks_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.fi"), LOG).unwrap();
        let mut ledger = dump_ledger(dir.path());

        let mut cutoff = Revnum::MAX;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 6);
        assert_eq!(cutoff, Revnum::MAX);
        assert_eq!(ledger.last_commit_mark(), 4);

        // commands of a dropped revision go with it
        let mut cutoff = 3;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 3);
        let stream = std::fs::read_to_string(dir.path().join("lib.fi")).unwrap();
        assert!(stream.ends_with("progress SVN r2 branch master = :2\n"));
        assert!(dir.path().join("lib.fi.old").exists());
    }

    #[tokio::test]
    async fn test_dump_stream_drops_unrecorded_tail() {
        let dir = tempfile::tempdir().unwrap();
        let written = format!(
            "{LOG}checkpoint\nprogress complete\n\
             blob\nmark :18446744073709551614\ndata 6\nSTRAY\n\n\
             commit refs/heads/master\nmark :5\n"
        );
        std::fs::write(dir.path().join("lib.fi"), &written).unwrap();

        let mut ledger = dump_ledger(dir.path());
        let mut cutoff = Revnum::MAX;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 6);
        assert_eq!(cutoff, Revnum::MAX);
        assert_eq!(std::fs::read_to_string(dir.path().join("lib.fi")).unwrap(), LOG);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lib.fi.old")).unwrap(),
            written
        );
    }

    #[tokio::test]
    async fn test_dump_stream_keeps_written_tags() {
        let dir = tempfile::tempdir().unwrap();
        let tagged = format!(
            "{LOG}progress Creating annotated tag v1 from ref refs/tags/v1\n\
             tag v1\nfrom refs/tags/v1\ntagger jo <jo@localhost> 100 +0000\ndata 3\nv1\n\n\
             progress SVN tag v1 at r4\n\n"
        );
        std::fs::write(
            dir.path().join("lib.fi"),
            format!("{tagged}checkpoint\nprogress complete\ncheckpoint\nprogress complete\n"),
        )
        .unwrap();

        // a clean close leaves only checkpoints behind the last record
        let mut ledger = dump_ledger(dir.path());
        let mut cutoff = Revnum::MAX;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 6);
        assert_eq!(std::fs::read_to_string(dir.path().join("lib.fi")).unwrap(), tagged);
        assert!(!dir.path().join("lib.fi.old").exists());

        // re-exporting the tag's revision drops the written tag
        let mut cutoff = 4;
        assert_eq!(ledger.setup_incremental(&mut cutoff).await.unwrap(), 4);
        let stream = std::fs::read_to_string(dir.path().join("lib.fi")).unwrap();
        assert!(stream.ends_with("progress SVN r3 branch stable = :2 # from branch master at r2\n"));
        assert!(!stream.contains("tag v1"));
    }

    #[test]
    fn test_parse_tag_progress() {
        assert_eq!(
            parse_tag_progress("progress SVN tag release/1.0 at r12\n"),
            Some((12, "release/1.0".to_string()))
        );
        assert!(parse_tag_progress("progress SVN r12 branch x = :1").is_none());
        assert!(parse_tag_progress("progress SVN tag x at rX").is_none());
        assert!(parse_progress("progress SVN tag v1 at r4").is_none());
    }
}
