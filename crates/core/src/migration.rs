//! Orchestration of a full migration run.
//!
//! A [`Migration`] loads the rules, declares the output repositories, works
//! out where an earlier run stopped, exports the remaining revisions in order
//! and finally writes the annotated tags and shuts every importer down.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::errors::{CoreError, ResumeError};
use crate::export::{RevisionExporter, RevisionSummary};
use crate::fastimport;
use crate::identity::IdentityMap;
use crate::ledger::SignatureMergePolicy;
use crate::registry::Registry;
use crate::rules::{load_rule_files, stats::RuleStat, RuleFile, RuleStats};
use crate::source::RevisionSource;
use crate::Revnum;

/// Outcome of [`Migration::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// First revision exported by this run.
    pub first_revision: Revnum,
    /// Last revision this run was asked to export.
    pub last_revision: Revnum,
    pub revisions_exported: usize,
    pub commits: usize,
    /// The shutdown flag stopped the run early.
    pub interrupted: bool,
    /// Where the next run continues.
    pub next_revision: Revnum,
    /// Per-rule match counts, empty unless statistics are enabled.
    pub rule_stats: Vec<RuleStat>,
}

pub struct Migration {
    config: MigrationConfig,
    exporter: RevisionExporter,
    shutdown: Arc<AtomicBool>,
}

impl Migration {
    /// Load the configured rule files and prepare the output repositories.
    pub async fn prepare(config: MigrationConfig, source: Arc<dyn RevisionSource>) -> Result<Self, CoreError> {
        let files = load_rule_files(&config.rules.files)?;
        Self::with_rules(config, source, files).await
    }

    /// Like [`Migration::prepare`] with rule files that are already parsed.
    pub async fn with_rules(
        config: MigrationConfig,
        source: Arc<dyn RevisionSource>,
        files: Vec<RuleFile>,
    ) -> Result<Self, CoreError> {
        let identities = IdentityMap::load(
            config.source.identity_map.as_deref(),
            &config.source.identity_domain,
        )?;
        info!(authors = identities.len(), "identity map loaded");

        let options = Arc::new(config.export_options());
        let factory = fastimport::sink_factory(&config);
        let merge_policy = Arc::new(SignatureMergePolicy::new(
            options.highest_only_signatures.clone(),
        ));
        let registry = Registry::declare(
            &files,
            Arc::clone(&options),
            factory,
            merge_policy,
            config.output.max_processes,
        )
        .await?;

        let stats = RuleStats::new(config.export.stats);
        let exporter = RevisionExporter::new(source, files, registry, identities, options, stats);
        Ok(Self {
            config,
            exporter,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Setting the flag stops the run after the current revision.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn exporter(&self) -> &RevisionExporter {
        &self.exporter
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.config.output.work_dir
    }

    /// Rebuild every repository's history from its progress log and return
    /// the first revision to export.
    ///
    /// A repository whose previous run was interrupted lowers the cutoff for
    /// all of them; when that happens after another repository was already
    /// replayed, the replay starts over with the lower cutoff.
    pub async fn plan_resume(&mut self) -> Result<Revnum, CoreError> {
        let resume_from = self.config.export.resume_from;
        let mut cutoff = if resume_from > 0 { resume_from } else { Revnum::MAX };
        let names = self.exporter.registry().direct_names().to_vec();

        let mut min_rev;
        'retry: loop {
            min_rev = 1;
            for name in &names {
                let ledger = self.exporter.registry_mut().ledger(name).await?;
                let next = ledger.setup_incremental(&mut cutoff).await?;
                if cutoff < resume_from && next == cutoff {
                    ledger.restore_log().await?;
                }
                if cutoff < min_rev {
                    debug!(repository = %name, cutoff, "cutoff moved before an earlier repository, replaying again");
                    continue 'retry;
                }
                min_rev = min_rev.max(next);
            }
            break;
        }

        if cutoff < resume_from {
            error!(requested = resume_from, cutoff, "cannot resume");
            return Err(ResumeError::CannotResume {
                requested: resume_from,
                cutoff,
            }
            .into());
        }
        if resume_from > 0 {
            min_rev = resume_from;
        }
        info!(start = min_rev, "resume point determined");
        Ok(min_rev)
    }

    /// Export every remaining revision. `on_revision` sees each revision's
    /// summary as soon as it is committed.
    pub async fn run<F>(&mut self, mut on_revision: F) -> Result<MigrationReport, CoreError>
    where
        F: FnMut(&RevisionSummary),
    {
        let first = self.plan_resume().await?;
        let latest = self.exporter.source().latest_revision().await?;
        let last = match self.config.export.max_revision {
            0 => latest,
            max => max.min(latest),
        };
        info!(first, last, "exporting revisions");

        let mut report = MigrationReport {
            first_revision: first,
            last_revision: last,
            revisions_exported: 0,
            commits: 0,
            interrupted: false,
            next_revision: first,
            rule_stats: Vec::new(),
        };

        for revision in first..=last {
            if self.shutdown.load(Ordering::SeqCst) {
                warn!(revision, "shutdown requested, stopping before revision");
                report.interrupted = true;
                break;
            }
            match self.exporter.export_revision(revision).await {
                Ok(summary) => {
                    report.revisions_exported += 1;
                    report.commits += summary.commits.len();
                    report.next_revision = revision + 1;
                    on_revision(&summary);
                }
                Err(e) => {
                    error!(revision, error = %e, "export failed");
                    self.close_after_failure().await;
                    return Err(e.into());
                }
            }
        }

        let registry = self.exporter.registry_mut();
        registry.finalize_tags().await?;
        registry.close_all().await?;

        let stats = self.exporter.stats();
        if stats.is_enabled() {
            report.rule_stats = stats.report();
            for stat in &report.rule_stats {
                info!(rule = %stat.rule, matches = stat.matches, "rule statistics");
            }
            for rule in stats.unused() {
                warn!(%rule, "rule never matched");
            }
        }

        info!(
            revisions = report.revisions_exported,
            commits = report.commits,
            next = report.next_revision,
            interrupted = report.interrupted,
            "migration finished"
        );
        Ok(report)
    }

    /// Checkpoint what was already written so a later run can resume.
    async fn close_after_failure(&mut self) {
        if let Err(e) = self.exporter.registry_mut().close_all().await {
            warn!(error = %e, "closing repositories after a failure also failed");
        }
    }
}
