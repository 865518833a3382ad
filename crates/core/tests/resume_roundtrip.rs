//! Incremental resume across runs: a split run must produce the same
//! history as an uninterrupted one, and interrupted importer runs must be
//! detected from their marks files.

mod common;

use std::path::Path;

use svnport_core::config::MigrationConfig;
use svnport_core::errors::ResumeError;
use svnport_core::source::MemorySource;
use svnport_core::CoreError;

use common::{
    commit_marks, dump_config, migrate, migration, progress_records, standard_history, stream,
    STANDARD_RULES,
};

// ===========================================================================
// Dump streams
// ===========================================================================

#[tokio::test]
async fn test_split_run_matches_uninterrupted_run() {
    let full_dir = tempfile::tempdir().unwrap();
    migrate(dump_config(full_dir.path()), &standard_history(), STANDARD_RULES)
        .await
        .unwrap();
    let full = stream(full_dir.path(), "lib");

    let dir = tempfile::tempdir().unwrap();
    let mut first = dump_config(dir.path());
    first.export.max_revision = 3;
    let report = migrate(first, &standard_history(), STANDARD_RULES).await.unwrap();
    assert_eq!(report.next_revision, 4);

    let report = migrate(dump_config(dir.path()), &standard_history(), STANDARD_RULES)
        .await
        .unwrap();
    assert_eq!(report.first_revision, 4);
    assert_eq!(report.revisions_exported, 4);

    let split = stream(dir.path(), "lib");
    assert_eq!(progress_records(&split), progress_records(&full));
    assert_eq!(commit_marks(&split), commit_marks(&full));
    assert!(split.contains("progress Branch refs/heads/stable reloaded\n"));
    assert_eq!(split.matches("tag v1.0\n").count(), 1);
}

#[tokio::test]
async fn test_finished_run_has_nothing_left() {
    let dir = tempfile::tempdir().unwrap();
    migrate(dump_config(dir.path()), &standard_history(), STANDARD_RULES)
        .await
        .unwrap();
    let before = progress_records(&stream(dir.path(), "lib"));

    let report = migrate(dump_config(dir.path()), &standard_history(), STANDARD_RULES)
        .await
        .unwrap();
    assert_eq!(report.first_revision, 8);
    assert_eq!(report.revisions_exported, 0);
    assert_eq!(progress_records(&stream(dir.path(), "lib")), before);
}

#[tokio::test]
async fn test_resume_from_reexports_later_revisions_once() {
    let dir = tempfile::tempdir().unwrap();
    migrate(dump_config(dir.path()), &standard_history(), STANDARD_RULES)
        .await
        .unwrap();
    let full = stream(dir.path(), "lib");

    let mut config = dump_config(dir.path());
    config.export.resume_from = 5;
    let report = migrate(config, &standard_history(), STANDARD_RULES).await.unwrap();
    assert_eq!(report.first_revision, 5);
    assert_eq!(report.revisions_exported, 3);

    let resumed = stream(dir.path(), "lib");
    assert_eq!(progress_records(&resumed), progress_records(&full));
    assert_eq!(commit_marks(&resumed), vec!["mark :1", "mark :2", "mark :3"]);
    assert_eq!(resumed.matches("tag v1.0\n").count(), 1);
    assert!(dir.path().join("lib.fi.old").exists());
}

#[tokio::test]
async fn test_stray_tail_is_cut_before_resuming() {
    let full_dir = tempfile::tempdir().unwrap();
    migrate(dump_config(full_dir.path()), &standard_history(), STANDARD_RULES)
        .await
        .unwrap();
    let full = stream(full_dir.path(), "lib");

    let dir = tempfile::tempdir().unwrap();
    let mut first = dump_config(dir.path());
    first.export.max_revision = 3;
    migrate(first, &standard_history(), STANDARD_RULES).await.unwrap();

    // a commit that never got its progress record
    let path = dir.path().join("lib.fi");
    let mut text = stream(dir.path(), "lib");
    text.push_str("commit refs/heads/master\nmark :2\nM 100644 inline a\ndata 5\nSTRAY\n");
    std::fs::write(&path, &text).unwrap();

    let report = migrate(dump_config(dir.path()), &standard_history(), STANDARD_RULES)
        .await
        .unwrap();
    assert_eq!(report.first_revision, 4);

    let resumed = stream(dir.path(), "lib");
    assert!(!resumed.contains("STRAY"));
    assert_eq!(resumed.matches("mark :2\n").count(), 1);
    assert_eq!(commit_marks(&resumed), commit_marks(&full));
    assert_eq!(progress_records(&resumed), progress_records(&full));
    assert_eq!(read(dir.path().join("lib.fi.old")), text);
}

/// trunk and one branch, both changed in r4.
fn two_branch_history() -> MemorySource {
    let mut repo = MemorySource::new();
    repo.commit("alice", 1000, "layout")
        .mkdir("/trunk")
        .mkdir("/branches")
        .done()
        .unwrap();
    repo.commit("alice", 2000, "add a").put("/trunk/a", "one\n").done().unwrap();
    repo.commit("bob", 3000, "branch stable")
        .copy("/trunk", 2, "/branches/stable")
        .done()
        .unwrap();
    repo.commit("bob", 4000, "change both")
        .put("/trunk/a", "two\n")
        .put("/branches/stable/a", "stable two\n")
        .done()
        .unwrap();
    repo
}

#[tokio::test]
async fn test_failed_message_filter_leaves_no_partial_revision() {
    let full_dir = tempfile::tempdir().unwrap();
    migrate(dump_config(full_dir.path()), &two_branch_history(), STANDARD_RULES)
        .await
        .unwrap();
    let full = stream(full_dir.path(), "lib");

    // passes messages through, except on its third call
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("filter-calls");
    let mut config = dump_config(dir.path());
    config.export.msg_filter = Some(format!(
        "n=$(cat '{0}' 2>/dev/null || echo 0); n=$((n + 1)); echo $n > '{0}'; \
         if [ $n -eq 3 ]; then exit 1; fi; cat",
        counter.display()
    ));
    let err = migrate(config, &two_branch_history(), STANDARD_RULES)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("message filter"), "{err}");
    assert_eq!(read(&counter).trim(), "3");

    // nothing of r4 is recorded, so the next run starts there
    let failed = stream(dir.path(), "lib");
    assert!(!failed.contains("progress SVN r4"));

    let report = migrate(dump_config(dir.path()), &two_branch_history(), STANDARD_RULES)
        .await
        .unwrap();
    assert_eq!(report.first_revision, 4);
    assert_eq!(report.revisions_exported, 1);

    let resumed = stream(dir.path(), "lib");
    assert_eq!(progress_records(&resumed), progress_records(&full));
    assert_eq!(commit_marks(&resumed), commit_marks(&full));
    assert_eq!(resumed.matches("data 4\ntwo\n").count(), 1);
    assert_eq!(resumed.matches("data 11\nstable two\n").count(), 1);
}

// ===========================================================================
// Importer logs and marks files
// ===========================================================================

const SINGLE: &str = "create repository lib\nend repository\n";

const PAIR: &str = "create repository a\nend repository\n\ncreate repository b\nend repository\n";

/// A log of `revisions` commits on master, one mark each.
fn log_text(revisions: u64) -> String {
    (1..=revisions)
        .map(|r| format!("progress SVN r{r} branch master = :{r}\n"))
        .collect()
}

/// An importer's work directory state for `name`: a repository directory
/// with a marks file holding marks `1..=persisted` and a progress log.
fn importer_state(work_dir: &Path, name: &str, logged: u64, persisted: u64) {
    std::fs::create_dir_all(work_dir.join(name)).unwrap();
    let marks: String = (1..=persisted).map(|m| format!(":{m} {m:040x}\n")).collect();
    std::fs::write(work_dir.join(name).join(format!("marks-{name}")), marks).unwrap();
    std::fs::write(work_dir.join(format!("log-{name}")), log_text(logged)).unwrap();
}

fn importer_config(work_dir: &Path) -> MigrationConfig {
    let mut config = MigrationConfig::default();
    config.output.work_dir = work_dir.to_path_buf();
    config
}

fn read(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn test_interrupted_run_rewinds_to_first_unpersisted_mark() {
    let dir = tempfile::tempdir().unwrap();
    importer_state(dir.path(), "lib", 4, 2);

    let mut run = migration(importer_config(dir.path()), &MemorySource::new(), SINGLE)
        .await
        .unwrap();
    assert_eq!(run.plan_resume().await.unwrap(), 3);

    assert_eq!(read(dir.path().join("log-lib")), log_text(2));
    assert_eq!(read(dir.path().join("log-lib.old")), log_text(4));
}

#[tokio::test]
async fn test_cannot_resume_past_an_interruption() {
    let dir = tempfile::tempdir().unwrap();
    importer_state(dir.path(), "lib", 4, 2);

    let mut config = importer_config(dir.path());
    config.export.resume_from = 4;
    let mut run = migration(config, &MemorySource::new(), SINGLE).await.unwrap();

    match run.plan_resume().await.unwrap_err() {
        CoreError::Resume(ResumeError::CannotResume { requested, cutoff }) => {
            assert_eq!(requested, 4);
            assert_eq!(cutoff, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    // the log is put back so the same request fails again
    assert_eq!(read(dir.path().join("log-lib")), log_text(4));
    assert!(!dir.path().join("log-lib.old").exists());
}

#[tokio::test]
async fn test_later_repository_rewinds_earlier_one() {
    let dir = tempfile::tempdir().unwrap();
    importer_state(dir.path(), "a", 5, 5);
    importer_state(dir.path(), "b", 5, 2);

    let mut run = migration(importer_config(dir.path()), &MemorySource::new(), PAIR)
        .await
        .unwrap();
    assert_eq!(run.plan_resume().await.unwrap(), 3);

    assert_eq!(read(dir.path().join("log-a")), log_text(2));
    assert_eq!(read(dir.path().join("log-a.old")), log_text(5));
    assert_eq!(read(dir.path().join("log-b")), log_text(2));
}
