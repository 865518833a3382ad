//! Error types for the svnport core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Configuration and rule errors abort a run before any revision is touched.
//! Export, ledger and sink errors abort the run in the middle; revisions that
//! were already flushed stay valid and a later run resumes after them.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Resume(#[from] ResumeError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

/// Errors raised while loading rule files or checking repository declarations.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A rule file (or an included file) could not be read.
    #[error("cannot read rules file '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A line could not be understood in its context.
    #[error("{file}:{line}: malformed rule: {detail}")]
    Malformed { file: String, line: usize, detail: String },

    /// A `match` pattern or substitution pattern is not a valid regex.
    #[error("{file}:{line}: invalid pattern '{pattern}': {detail}")]
    InvalidPattern {
        file: String,
        line: usize,
        pattern: String,
        detail: String,
    },

    /// A `substitute` line is not of the form `s/pattern/replacement/`.
    #[error("{file}:{line}: invalid substitution '{text}'")]
    InvalidSubstitution { file: String, line: usize, text: String },

    /// `${NAME}` was used without a prior `declare` and without a default.
    #[error("{file}:{line}: undeclared variable '{name}'")]
    UndeclaredVariable { file: String, line: usize, name: String },

    /// A repository declares a forward target and also owns branches or a description.
    #[error("repository '{name}' declared at {location} forwards to '{target}' but also declares branches or a description")]
    ContradictoryRepository {
        name: String,
        target: String,
        location: String,
    },

    /// A forwarding repository points at a repository that was never declared.
    #[error("repository '{name}' forwards to undeclared repository '{target}'")]
    UnknownForwardTarget { name: String, target: String },

    /// A rule references a repository that was never declared.
    #[error("rule {rule} references undeclared repository '{repository}'")]
    UnknownRepository { rule: String, repository: String },
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

/// Errors from the author identity map.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The mapping file could not be loaded.
    #[error("identity mapping file error at '{path}': {detail}")]
    MappingFileError { path: String, detail: String },

    /// TOML parse error when reading a TOML mapping file.
    #[error("identity mapping parse error: {0}")]
    ParseError(String),

    /// Generic I/O error.
    #[error("identity I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Revision source errors
// ---------------------------------------------------------------------------

/// Errors from the Subversion revision source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The `svnlook` binary was not found on `$PATH`.
    #[error("svnlook binary not found: {0}")]
    BinaryNotFound(String),

    /// An `svnlook` command exited with a non-zero status.
    #[error("svnlook command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// Output of a source command could not be understood.
    #[error("cannot parse source output: {0}")]
    ParseError(String),

    /// The requested revision does not exist.
    #[error("revision {0} not found")]
    RevisionNotFound(i64),

    /// The requested node does not exist in the given revision.
    #[error("path '{path}' not found in revision {revision}")]
    PathNotFound { path: String, revision: i64 },

    /// Generic I/O wrapper.
    #[error("source I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sink errors
// ---------------------------------------------------------------------------

/// Errors from the processes and files that receive the command stream.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The importer process could not be started.
    #[error("cannot start importer for repository '{repository}': {source}")]
    SpawnFailed {
        repository: String,
        #[source]
        source: std::io::Error,
    },

    /// The importer exited while the stream was still being written.
    #[error("importer for repository '{0}' died unexpectedly")]
    ProcessDied(String),

    /// The importer did not acknowledge a checkpoint in time.
    #[error("importer for repository '{repository}' did not finish a checkpoint within {secs}s")]
    CheckpointTimeout { repository: String, secs: u64 },

    /// A content stream ended before the announced length.
    #[error("content for '{path}' ended after {actual} of {expected} bytes")]
    ShortContent { path: String, expected: u64, actual: u64 },

    /// The message filter command failed.
    #[error("message filter '{command}' failed: {detail}")]
    MessageFilter { command: String, detail: String },

    /// Creating the target repository failed.
    #[error("cannot initialise repository at '{path}': {source}")]
    RepositoryInit {
        path: String,
        #[source]
        source: git2::Error,
    },

    /// Generic I/O wrapper.
    #[error("sink I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Ledger errors
// ---------------------------------------------------------------------------

/// Errors from branch bookkeeping inside one output repository.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A branch was created from a branch this repository has never seen.
    #[error("repository '{repository}': branch '{branch}' created from unknown branch '{from}'")]
    UnknownSourceBranch {
        repository: String,
        branch: String,
        from: String,
    },

    /// Commit marks and file marks would collide.
    #[error("repository '{0}': mark allocator exhausted")]
    MarksExhausted(String),

    /// Transactions were still open when the repository shut down.
    #[error("repository '{repository}' closed with {count} outstanding transactions")]
    OutstandingTransactions { repository: String, count: usize },

    /// The named repository is not a direct repository of this run.
    #[error("no such repository: '{0}'")]
    NoSuchRepository(String),

    /// Underlying sink failure.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Underlying source failure while streaming content.
    #[error(transparent)]
    Source(#[from] SourceError),
}

// ---------------------------------------------------------------------------
// Resume errors
// ---------------------------------------------------------------------------

/// Errors from incremental resume.
#[derive(Debug, Error)]
pub enum ResumeError {
    /// The requested resume point lies after an interrupted revision.
    #[error("cannot resume from revision {requested}: revision {cutoff} was not completely exported")]
    CannotResume { requested: i64, cutoff: i64 },

    /// Reading or rewriting a marks or log file failed.
    #[error("resume I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors raised while exporting one revision.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A changed path is not covered by any rule and was never a directory.
    #[error("r{revision}: path '{path}' is not matched by any rule")]
    UnmatchedPath { path: String, revision: i64 },

    /// The source reported a change kind that cannot appear in a revision.
    #[error("r{revision}: unexpected reset record for '{path}'")]
    UnexpectedReset { path: String, revision: i64 },

    /// The same path appeared twice in one revision's change set.
    #[error("r{revision}: duplicate change record for '{path}'")]
    DuplicatePath { path: String, revision: i64 },

    /// A rule produced a repository name that was never declared.
    #[error("r{revision}: rule {rule} selects unknown repository '{repository}' for '{path}'")]
    UnknownRepository {
        rule: String,
        repository: String,
        path: String,
        revision: i64,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
