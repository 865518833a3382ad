//! Shared helpers for the end-to-end tests.
//!
//! Every test drives a [`Migration`] over an in-memory Subversion history
//! and writes dump streams (`<repo>.fi`) into a temporary work directory, so
//! neither `svnlook` nor `git` is needed.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use svnport_core::config::{MigrationConfig, OutputMode};
use svnport_core::rules::RuleFile;
use svnport_core::source::MemorySource;
use svnport_core::{CoreError, Migration, MigrationReport};

/// trunk, branches and annotated tags of a single repository `lib`.
pub const STANDARD_RULES: &str = r#"
create repository lib
end repository

match /trunk/
    repository lib
    branch master
end match

match /branches/([^/]+)/
    repository lib
    branch \1
end match

match /tags/([^/]+)/
    repository lib
    branch refs/tags/\1
    annotated true
end match

match /
end match
"#;

pub fn dump_config(work_dir: &Path) -> MigrationConfig {
    let mut config = MigrationConfig::default();
    config.output.mode = OutputMode::Dump;
    config.output.work_dir = work_dir.to_path_buf();
    config
}

pub async fn migration(config: MigrationConfig, source: &MemorySource, rules: &str) -> Result<Migration, CoreError> {
    let file = RuleFile::parse_str("test.rules", rules)?;
    Migration::with_rules(config, Arc::new(source.clone()), vec![file]).await
}

pub async fn migrate(config: MigrationConfig, source: &MemorySource, rules: &str) -> Result<MigrationReport, CoreError> {
    migration(config, source, rules).await?.run(|_| {}).await
}

/// The dump stream of `repository`, empty if it was never written.
pub fn stream(work_dir: &Path, repository: &str) -> String {
    std::fs::read_to_string(work_dir.join(format!("{repository}.fi"))).unwrap_or_default()
}

/// The `progress SVN ...` records of a stream, in order.
pub fn progress_records(stream: &str) -> Vec<String> {
    stream
        .lines()
        .filter(|line| line.starts_with("progress SVN r"))
        .map(str::to_string)
        .collect()
}

/// Marks of every `commit` on a branch or tag ref, in stream order.
pub fn commit_marks(stream: &str) -> Vec<String> {
    let lines: Vec<&str> = stream.lines().collect();
    lines
        .windows(2)
        .filter(|pair| pair[0].starts_with("commit refs/heads/") || pair[0].starts_with("commit refs/tags/"))
        .map(|pair| pair[1].to_string())
        .collect()
}

/// A small history exercising branching, merging, tagging and branch
/// deletion.
///
/// r1 layout, r2 README on trunk, r3 stable branched from r2, r4 fix on
/// stable, r5 README copied back to trunk, r6 tag v1.0 from trunk, r7 stable
/// deleted.
pub fn standard_history() -> MemorySource {
    let mut repo = MemorySource::new();
    repo.commit("alice", 1000, "layout")
        .mkdir("/trunk")
        .mkdir("/branches")
        .mkdir("/tags")
        .done()
        .unwrap();
    repo.commit("alice", 2000, "add readme")
        .put("/trunk/README", "hello\n")
        .done()
        .unwrap();
    repo.commit("bob", 3000, "branch stable")
        .copy("/trunk", 2, "/branches/stable")
        .done()
        .unwrap();
    repo.commit("bob", 4000, "fix on stable")
        .put("/branches/stable/README", "hello stable\n")
        .done()
        .unwrap();
    repo.commit("alice", 5000, "merge stable")
        .copy("/branches/stable/README", 4, "/trunk/README")
        .done()
        .unwrap();
    repo.commit("carol", 6000, "tag 1.0")
        .copy("/trunk", 5, "/tags/v1.0")
        .done()
        .unwrap();
    repo.commit("bob", 7000, "drop stable")
        .delete("/branches/stable")
        .done()
        .unwrap();
    repo
}
