//! TOML-based configuration for a migration run.
//!
//! The file is optional: the CLI can build a [`MigrationConfig`] from flags
//! alone, and flags override anything read from disk. Once validated, the
//! configuration is frozen into an [`ExportOptions`] value that the exporter
//! and every ledger receive at construction time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Commit-message signature of repositories converted by cvs2svn. Commits
/// carrying it keep only their highest merge parent.
pub const CVS2SVN_SIGNATURE: &str = "This commit was manufactured by cvs2svn";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level migration configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Subversion repository and author settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Rule files.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Export behaviour.
    #[serde(default)]
    pub export: ExportConfig,

    /// Where and how the command stream is written.
    #[serde(default)]
    pub output: OutputConfig,

    /// Merge-parent selection.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// The Subversion repository being migrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path of the local repository (the directory `svnadmin create` made).
    #[serde(default)]
    pub repository: PathBuf,

    /// Optional author map file.
    #[serde(default)]
    pub identity_map: Option<PathBuf>,

    /// Email domain for authors missing from the map.
    #[serde(default = "default_identity_domain")]
    pub identity_domain: String,
}

fn default_identity_domain() -> String {
    "localhost".into()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository: PathBuf::new(),
            identity_map: None,
            identity_domain: default_identity_domain(),
        }
    }
}

/// Rule files; each one is an independent rule list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Export behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Resume at this revision (0 = continue where the previous run stopped).
    #[serde(default)]
    pub resume_from: i64,

    /// Last revision to export (0 = the latest revision).
    #[serde(default)]
    pub max_revision: i64,

    /// Number of transactions between two checkpoints.
    #[serde(default = "default_commit_interval")]
    pub commit_interval: u64,

    #[serde(default)]
    pub add_metadata: bool,

    #[serde(default)]
    pub add_metadata_notes: bool,

    /// Re-stage the whole tree when a branch is created by a copy.
    #[serde(default)]
    pub svn_branches: bool,

    /// Turn `svn:ignore` properties into `.gitignore` files.
    #[serde(default)]
    pub svn_ignore: bool,

    /// Keep empty directories alive with an empty `.gitignore`.
    #[serde(default)]
    pub empty_dirs: bool,

    /// Warn about properties that are not carried over.
    #[serde(default)]
    pub propcheck: bool,

    /// Shell command every commit message is piped through.
    #[serde(default)]
    pub msg_filter: Option<String>,

    /// Count rule matches and report them at the end.
    #[serde(default)]
    pub stats: bool,
}

fn default_commit_interval() -> u64 {
    10_000
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            resume_from: 0,
            max_revision: 0,
            commit_interval: default_commit_interval(),
            add_metadata: false,
            add_metadata_notes: false,
            svn_branches: false,
            svn_ignore: false,
            empty_dirs: false,
            propcheck: false,
            msg_filter: None,
            stats: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// What receives the command stream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Pipe into `git fast-import` running in a bare repository.
    #[default]
    FastImport,
    /// Append the stream to `<repository>.fi`.
    Dump,
    /// Append the stream to the progress log only.
    DryRun,
}

/// Output location and process limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,

    /// Directory holding repositories, marks files and logs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Forwarded to `git fast-import --max-pack-size`.
    #[serde(default)]
    pub max_pack_size: Option<String>,

    /// Maximum number of importer processes alive at once.
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,

    /// Seconds to wait for an importer to exit after `done`.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,

    /// Seconds to wait after terminating an importer that did not exit.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_secs: u64,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_processes() -> usize {
    100
}
fn default_close_timeout() -> u64 {
    60
}
fn default_kill_timeout() -> u64 {
    30
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            work_dir: default_work_dir(),
            max_pack_size: None,
            max_processes: default_max_processes(),
            close_timeout_secs: default_close_timeout(),
            kill_timeout_secs: default_kill_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge-parent selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Message signatures for which only the highest merge mark is kept.
    #[serde(default = "default_highest_only_signatures")]
    pub highest_only_signatures: Vec<String>,
}

fn default_highest_only_signatures() -> Vec<String> {
    vec![CVS2SVN_SIGNATURE.to_string()]
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            highest_only_signatures: default_highest_only_signatures(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl MigrationConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: MigrationConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.repository.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source.repository".into(),
                detail: "a Subversion repository path is required".into(),
            });
        }
        if self.rules.files.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rules.files".into(),
                detail: "at least one rules file is required".into(),
            });
        }
        if self.export.commit_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "export.commit_interval".into(),
                detail: "commit interval must be > 0".into(),
            });
        }
        if self.export.resume_from < 0 || self.export.max_revision < 0 {
            return Err(ConfigError::InvalidValue {
                field: "export".into(),
                detail: "revision numbers must not be negative".into(),
            });
        }
        if self.export.resume_from > 0
            && self.export.max_revision > 0
            && self.export.resume_from > self.export.max_revision
        {
            return Err(ConfigError::InvalidValue {
                field: "export.resume_from".into(),
                detail: format!(
                    "resume point r{} lies after the last revision r{}",
                    self.export.resume_from, self.export.max_revision
                ),
            });
        }
        if self.output.max_processes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "output.max_processes".into(),
                detail: "at least one importer process must be allowed".into(),
            });
        }
        if self.source.identity_domain.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source.identity_domain".into(),
                detail: "identity domain must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Freeze the settings the export engine consults while running.
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            add_metadata: self.export.add_metadata,
            add_metadata_notes: self.export.add_metadata_notes,
            svn_branches: self.export.svn_branches,
            svn_ignore: self.export.svn_ignore,
            empty_dirs: self.export.empty_dirs,
            propcheck: self.export.propcheck,
            commit_interval: self.export.commit_interval,
            msg_filter: self.export.msg_filter.clone(),
            highest_only_signatures: self.merge.highest_only_signatures.clone(),
        }
    }
}

/// Immutable settings shared by the exporter and the ledgers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub add_metadata: bool,
    pub add_metadata_notes: bool,
    pub svn_branches: bool,
    pub svn_ignore: bool,
    pub empty_dirs: bool,
    pub propcheck: bool,
    pub commit_interval: u64,
    pub msg_filter: Option<String>,
    pub highest_only_signatures: Vec<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        MigrationConfig::default().export_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[source]
repository = "/srv/svn/kde"
identity_map = "/etc/svnport/authors.txt"
identity_domain = "kde.org"

[rules]
files = ["kde.rules", "extragear.rules"]

[export]
commit_interval = 500
add_metadata = true
svn_ignore = true
msg_filter = "sed -e s/foo/bar/"

[output]
mode = "dump"
work_dir = "/tmp/export"
max_processes = 8

[merge]
highest_only_signatures = ["manufactured by cvs2svn", "imported by tailor"]
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: MigrationConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.source.repository, PathBuf::from("/srv/svn/kde"));
        assert_eq!(config.source.identity_domain, "kde.org");
        assert_eq!(config.rules.files.len(), 2);
        assert_eq!(config.export.commit_interval, 500);
        assert!(config.export.add_metadata);
        assert!(!config.export.add_metadata_notes);
        assert_eq!(config.output.mode, OutputMode::Dump);
        assert_eq!(config.output.max_processes, 8);
        assert_eq!(config.merge.highest_only_signatures.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[source]
repository = "/srv/svn/repo"
[rules]
files = ["repo.rules"]
"#;
        let config: MigrationConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.export.commit_interval, 10_000);
        assert_eq!(config.output.mode, OutputMode::FastImport);
        assert_eq!(config.output.max_processes, 100);
        assert_eq!(config.output.close_timeout_secs, 60);
        assert_eq!(config.output.kill_timeout_secs, 30);
        assert_eq!(config.source.identity_domain, "localhost");
        assert_eq!(config.merge.highest_only_signatures, vec![CVS2SVN_SIGNATURE.to_string()]);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svnport.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = MigrationConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.output.work_dir, PathBuf::from("/tmp/export"));
    }

    #[test]
    fn test_file_not_found() {
        let result = MigrationConfig::load_from_file("/nonexistent/svnport.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        config.export.commit_interval = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "export.commit_interval"
        ));
    }

    #[test]
    fn test_validate_requires_rules() {
        let mut config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        config.rules.files.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "rules.files"
        ));
    }

    #[test]
    fn test_validate_rejects_resume_after_max() {
        let mut config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        config.export.resume_from = 50;
        config.export.max_revision = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_export_options_snapshot() {
        let config: MigrationConfig = toml::from_str(sample_toml()).unwrap();
        let options = config.export_options();
        assert!(options.add_metadata);
        assert!(options.svn_ignore);
        assert_eq!(options.commit_interval, 500);
        assert_eq!(options.msg_filter.as_deref(), Some("sed -e s/foo/bar/"));
    }
}
