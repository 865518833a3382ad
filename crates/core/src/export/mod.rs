//! The revision export engine.
//!
//! [`RevisionExporter`] turns one Subversion revision at a time into commits
//! on the output repositories. It owns the rule lists, the repository
//! registry and the rule statistics for the whole run.

pub mod content;
mod revision;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::ExportOptions;
use crate::errors::ExportError;
use crate::identity::IdentityMap;
use crate::registry::Registry;
use crate::rules::{MatchRule, RuleFile, RuleStats};
use crate::source::RevisionSource;
use crate::Revnum;

use revision::RevisionRun;

/// One commit written for a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// The repository name the rule produced.
    pub repository: String,
    pub branch: String,
    /// Path prefix added by forwarding, usually empty.
    pub prefix: String,
    pub modifications: usize,
    pub mark: u64,
}

/// What exporting a revision produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSummary {
    pub revision: Revnum,
    /// Empty when nothing in the revision needed a commit.
    pub commits: Vec<CommitSummary>,
}

impl RevisionSummary {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

impl fmt::Display for RevisionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}:", self.revision)?;
        if self.commits.is_empty() {
            return write!(f, " nothing to do");
        }
        for (i, commit) in self.commits.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}/{}", commit.repository, commit.branch)?;
            if !commit.prefix.is_empty() {
                write!(f, " [{}]", commit.prefix)?;
            }
            write!(f, " ({} changes)", commit.modifications)?;
        }
        Ok(())
    }
}

pub struct RevisionExporter {
    source: Arc<dyn RevisionSource>,
    rule_lists: Vec<Vec<MatchRule>>,
    registry: Registry,
    identities: IdentityMap,
    options: Arc<ExportOptions>,
    stats: RuleStats,
}

impl RevisionExporter {
    /// Each rules file is an independent rule list.
    pub fn new(
        source: Arc<dyn RevisionSource>,
        rule_files: Vec<RuleFile>,
        registry: Registry,
        identities: IdentityMap,
        options: Arc<ExportOptions>,
        mut stats: RuleStats,
    ) -> Self {
        let rule_lists: Vec<Vec<MatchRule>> = rule_files.into_iter().map(|f| f.rules).collect();
        stats.register(rule_lists.iter().flatten());
        Self {
            source,
            rule_lists,
            registry,
            identities,
            options,
            stats,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn stats(&self) -> &RuleStats {
        &self.stats
    }

    pub fn source(&self) -> &Arc<dyn RevisionSource> {
        &self.source
    }

    /// Export `revision`. Revisions must be exported in increasing order.
    ///
    /// On error nothing of the revision is committed; earlier revisions stay
    /// valid.
    pub async fn export_revision(&mut self, revision: Revnum) -> Result<RevisionSummary, ExportError> {
        debug!(revision, "exporting revision");
        let mut run = RevisionRun::new(
            revision,
            self.source.as_ref(),
            &self.rule_lists,
            &mut self.registry,
            &self.identities,
            &self.options,
            &mut self.stats,
        );

        if let Err(e) = run.prepare().await {
            run.abandon().await;
            return Err(e);
        }
        if !run.needs_commit() {
            run.abandon().await;
            return Ok(RevisionSummary {
                revision,
                commits: Vec::new(),
            });
        }
        run.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = RevisionSummary {
            revision: 12,
            commits: vec![
                CommitSummary {
                    repository: "kdelibs".into(),
                    branch: "master".into(),
                    prefix: String::new(),
                    modifications: 3,
                    mark: 40,
                },
                CommitSummary {
                    repository: "kdelibs-doc".into(),
                    branch: "master".into(),
                    prefix: "doc/".into(),
                    modifications: 1,
                    mark: 41,
                },
            ],
        };
        assert_eq!(
            summary.to_string(),
            "r12: kdelibs/master (3 changes), kdelibs-doc/master [doc/] (1 changes)"
        );

        let empty = RevisionSummary {
            revision: 13,
            commits: Vec::new(),
        };
        assert!(empty.is_empty());
        assert_eq!(empty.to_string(), "r13: nothing to do");
    }
}
