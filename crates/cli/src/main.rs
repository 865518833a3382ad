//! svnport command-line tool.
//!
//! Runs a migration from a local Subversion repository into git
//! fast-import streams, and provides helpers to generate and validate the
//! configuration and to check author mappings.

mod progress;
mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use svnport_core::config::{MigrationConfig, OutputMode};
use svnport_core::identity::IdentityMap;
use svnport_core::rules::load_rule_files;
use svnport_core::source::{RevisionSource, SvnlookSource};
use svnport_core::{Migration, MigrationReport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Migrate Subversion history into git.
#[derive(Parser, Debug)]
#[command(
    name = "svnport",
    version,
    about = "Convert a Subversion repository into git repositories following a set of rules"
)]
struct Cli {
    /// Path to the TOML configuration file. Flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log rule matching decisions.
    #[arg(long, global = true)]
    debug_rules: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export revisions, continuing where the previous run stopped.
    Run(RunArgs),

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./svnport.toml")]
        output: PathBuf,
    },

    /// Validate the configuration and the rule files it names.
    Validate,

    /// Manage Subversion-to-git author mappings.
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Show the committer a Subversion user maps to.
    Lookup {
        /// Subversion username to look up.
        svn_user: String,
    },
}

/// Overrides for the `[source]`, `[rules]`, `[export]` and `[output]` tables.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Local Subversion repository.
    repository: Option<PathBuf>,

    /// Rules file; repeat for independent rule lists.
    #[arg(long = "rules", value_name = "FILE")]
    rules: Vec<PathBuf>,

    /// Author map file.
    #[arg(long)]
    identity_map: Option<PathBuf>,

    /// Email domain for authors missing from the map.
    #[arg(long)]
    identity_domain: Option<String>,

    /// Resume at this revision instead of where the previous run stopped.
    #[arg(long, value_name = "REV")]
    resume_from: Option<i64>,

    /// Last revision to export.
    #[arg(long = "max-rev", value_name = "REV")]
    max_revision: Option<i64>,

    /// Transactions between importer checkpoints.
    #[arg(long)]
    commit_interval: Option<u64>,

    /// Append `svn path=...; revision=...` to every commit message.
    #[arg(long)]
    add_metadata: bool,

    /// Record the same metadata as git notes.
    #[arg(long)]
    add_metadata_notes: bool,

    /// Re-stage the whole tree when a branch is created.
    #[arg(long)]
    svn_branches: bool,

    /// Turn svn:ignore properties into .gitignore files.
    #[arg(long)]
    svn_ignore: bool,

    /// Keep empty directories with an empty .gitignore.
    #[arg(long)]
    empty_dirs: bool,

    /// Warn about Subversion properties with no git counterpart.
    #[arg(long)]
    propcheck: bool,

    /// Shell command that rewrites every commit message.
    #[arg(long, value_name = "COMMAND")]
    msg_filter: Option<String>,

    /// Report how often each rule matched.
    #[arg(long)]
    stats: bool,

    /// Write `<repo>.fi` stream files instead of running git fast-import.
    #[arg(long, conflicts_with = "dry_run")]
    create_dump: bool,

    /// Only write the progress logs.
    #[arg(long)]
    dry_run: bool,

    /// Directory for repositories, marks files and logs.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Forwarded to git fast-import --max-pack-size.
    #[arg(long)]
    max_pack_size: Option<String>,

    /// Most importers kept running at once.
    #[arg(long)]
    max_processes: Option<usize>,

    /// Print every revision that produced commits.
    #[arg(short, long)]
    verbose: bool,
}

impl RunArgs {
    /// Apply the flags that were given on top of `config`.
    fn apply(&self, config: &mut MigrationConfig) {
        if let Some(repository) = &self.repository {
            config.source.repository = repository.clone();
        }
        if !self.rules.is_empty() {
            config.rules.files = self.rules.clone();
        }
        if let Some(path) = &self.identity_map {
            config.source.identity_map = Some(path.clone());
        }
        if let Some(domain) = &self.identity_domain {
            config.source.identity_domain = domain.clone();
        }
        if let Some(rev) = self.resume_from {
            config.export.resume_from = rev;
        }
        if let Some(rev) = self.max_revision {
            config.export.max_revision = rev;
        }
        if let Some(interval) = self.commit_interval {
            config.export.commit_interval = interval;
        }
        if let Some(filter) = &self.msg_filter {
            config.export.msg_filter = Some(filter.clone());
        }

        let export = &mut config.export;
        export.add_metadata |= self.add_metadata;
        export.add_metadata_notes |= self.add_metadata_notes;
        export.svn_branches |= self.svn_branches;
        export.svn_ignore |= self.svn_ignore;
        export.empty_dirs |= self.empty_dirs;
        export.propcheck |= self.propcheck;
        export.stats |= self.stats;

        if self.create_dump {
            config.output.mode = OutputMode::Dump;
        }
        if self.dry_run {
            config.output.mode = OutputMode::DryRun;
        }
        if let Some(dir) = &self.work_dir {
            config.output.work_dir = dir.clone();
        }
        if let Some(size) = &self.max_pack_size {
            config.output.max_pack_size = Some(size.clone());
        }
        if let Some(max) = self.max_processes {
            config.output.max_processes = max;
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug_rules {
        "info,svnport_core=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::failure(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => cmd_run(cli.config.as_deref(), &args).await,
        Commands::Init { output } => cmd_init(&output).map(|()| ExitCode::SUCCESS),
        Commands::Validate => cmd_validate(cli.config.as_deref()).map(|()| ExitCode::SUCCESS),
        Commands::Identity { action } => {
            cmd_identity(cli.config.as_deref(), action).map(|()| ExitCode::SUCCESS)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// The configuration file if one was given, defaults otherwise.
fn load_config(path: Option<&Path>) -> Result<MigrationConfig> {
    match path {
        Some(path) => MigrationConfig::load_from_file(path).context("failed to load configuration file"),
        None => Ok(MigrationConfig::default()),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, args: &RunArgs) -> Result<ExitCode> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    config.validate().context("configuration validation failed")?;

    info!(
        repository = %config.source.repository.display(),
        work_dir = %config.output.work_dir.display(),
        mode = ?config.output.mode,
        "starting migration"
    );

    let source: Arc<dyn RevisionSource> = Arc::new(SvnlookSource::new(&config.source.repository));
    let latest = source
        .latest_revision()
        .await
        .context("failed to read the youngest revision")?;
    let last = match config.export.max_revision {
        0 => latest,
        max => max.min(latest),
    };

    let mut migration = Migration::prepare(config, source)
        .await
        .context("failed to prepare the migration")?;
    signals::forward_shutdown(migration.shutdown_flag());

    let bar = progress::revision_bar(last);
    let result = migration
        .run(|summary| progress::record(&bar, summary, args.verbose))
        .await;
    bar.finish_and_clear();
    let report = result.context("migration failed")?;

    print_report(&report);
    Ok(if report.interrupted {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_report(report: &MigrationReport) {
    println!();
    if report.interrupted {
        println!(
            "{}",
            style::interrupted(&format!(
                "Interrupted; the next run continues at r{}",
                report.next_revision
            ))
        );
    } else {
        println!("{}", style::done("Migration complete"));
    }
    println!(
        "  Revisions: r{}..r{} ({} exported)",
        report.first_revision, report.last_revision, report.revisions_exported
    );
    println!("  Commits  : {}", report.commits);

    if !report.rule_stats.is_empty() {
        println!();
        println!("{}", style::title("Rule statistics"));
        for stat in &report.rule_stats {
            let line = format!("{:>8}  {}", stat.matches, stat.rule);
            if stat.matches == 0 {
                println!("{}", style::unused_rule(&line));
            } else {
                println!("{line}");
            }
        }
    }
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# svnport configuration
# Every value can be overridden on the command line; see `svnport run --help`.

[source]
repository = "/srv/svn/project"
# identity_map = "authors.txt"
identity_domain = "localhost"

[rules]
files = ["project.rules"]

[export]
resume_from = 0
max_revision = 0
commit_interval = 10000
add_metadata = false
add_metadata_notes = false
svn_branches = false
svn_ignore = false
empty_dirs = false
propcheck = false
# msg_filter = "sed -e 's/^git-svn-id:.*//'"
stats = false

[output]
mode = "fast-import"
work_dir = "."
# max_pack_size = "2g"
max_processes = 100
close_timeout_secs = 60
kill_timeout_secs = 30

[merge]
highest_only_signatures = ["This commit was manufactured by cvs2svn"]
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("{}", style::done(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Point source.repository at a local Subversion repository");
    println!("  2. Write the rules files listed under [rules]");
    println!("  3. Validate with: svnport validate --config {}", output.display());
    println!("  4. Migrate with: svnport run --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: Option<&Path>) -> Result<()> {
    let path = config_path.context("validate needs --config")?;
    println!("Validating configuration: {}", path.display());
    println!();

    let config = MigrationConfig::load_from_file(path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {e}");
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    let files = load_rule_files(&config.rules.files).context("failed to load rule files")?;
    let repositories: usize = files.iter().map(|f| f.repositories.len()).sum();
    let rules: usize = files.iter().map(|f| f.rules.len()).sum();
    println!("  [OK] {} rule file(s) parsed", files.len());

    let identities = IdentityMap::load(
        config.source.identity_map.as_deref(),
        &config.source.identity_domain,
    )
    .context("failed to load identity map")?;
    println!("  [OK] Identity map loaded");

    println!();
    println!("Configuration summary:");
    println!("  Repository    : {}", config.source.repository.display());
    println!("  Rule files    : {}", config.rules.files.len());
    println!("  Repositories  : {repositories}");
    println!("  Match rules   : {rules}");
    println!("  Known authors : {}", identities.len());
    println!("  Output mode   : {}", style::mode(config.output.mode));
    println!("  Work directory: {}", config.output.work_dir.display());
    println!();
    println!("{}", style::done("Configuration is valid."));

    Ok(())
}

fn cmd_identity(config_path: Option<&Path>, action: IdentityAction) -> Result<()> {
    let config = load_config(config_path)?;
    let map = IdentityMap::load(
        config.source.identity_map.as_deref(),
        &config.source.identity_domain,
    )
    .context("failed to load identity map")?;

    match action {
        IdentityAction::Lookup { svn_user } => {
            println!("SVN user : {svn_user}");
            println!("Committer: {}", map.committer(Some(&svn_user)));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let args = run_args(&[
            "svnport",
            "run",
            "/srv/svn/kde",
            "--rules",
            "a.rules",
            "--rules",
            "b.rules",
            "--max-rev",
            "500",
            "--create-dump",
            "--svn-ignore",
        ]);

        let mut config = MigrationConfig::default();
        config.export.add_metadata = true;
        args.apply(&mut config);

        assert_eq!(config.source.repository, PathBuf::from("/srv/svn/kde"));
        assert_eq!(config.rules.files.len(), 2);
        assert_eq!(config.export.max_revision, 500);
        assert_eq!(config.output.mode, OutputMode::Dump);
        assert!(config.export.svn_ignore);
        // flags only ever switch options on
        assert!(config.export.add_metadata);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dump_and_dry_run_conflict() {
        assert!(Cli::try_parse_from(["svnport", "run", "--create-dump", "--dry-run"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["svnport", "validate", "--config", "x.toml", "--debug-rules"]).unwrap();
        assert!(cli.debug_rules);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }
}
