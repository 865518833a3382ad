//! Revision source backed by the `svnlook` CLI.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

use super::parser::{parse_changed, parse_date, parse_proplist, parse_tree, parse_youngest};
use super::{
    ChangeRecord, ContentStream, DirEntry, NodeKind, Properties, RevisionMetadata, RevisionSource,
};
use crate::errors::SourceError;
use crate::Revnum;

/// Reads a local repository with `svnlook`.
#[derive(Debug, Clone)]
pub struct SvnlookSource {
    repository: PathBuf,
    binary: String,
}

impl SvnlookSource {
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        let source = Self {
            repository: repository.into(),
            binary: "svnlook".into(),
        };
        info!(repository = %source.repository.display(), "opened svnlook source");
        source
    }

    /// Use a different `svnlook` executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn repository(&self) -> &Path {
        &self.repository
    }

    fn command(&self, subcommand: &str, revision: Option<Revnum>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(subcommand);
        if let Some(rev) = revision {
            cmd.arg("-r").arg(rev.to_string());
        }
        cmd.arg(&self.repository);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<Vec<u8>, SourceError> {
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!(cmd = ?cmd.as_std(), "running svnlook");

        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(SourceError::CommandFailed { exit_code, stderr });
        }
        Ok(output.stdout)
    }

    async fn run_text(&self, cmd: Command) -> Result<String, SourceError> {
        let stdout = self.run(cmd).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn spawn_error(&self, e: std::io::Error) -> SourceError {
        if e.kind() == std::io::ErrorKind::NotFound {
            SourceError::BinaryNotFound(self.binary.clone())
        } else {
            SourceError::IoError(e)
        }
    }

    async fn tree(&self, revision: Revnum, path: &str) -> Result<(NodeKind, Vec<DirEntry>), SourceError> {
        if revision < 1 {
            return Ok((NodeKind::None, Vec::new()));
        }
        let mut cmd = self.command("tree", Some(revision));
        cmd.arg("--non-recursive").arg("--full-paths").arg(path);
        match self.run_text(cmd).await {
            Ok(output) => Ok(parse_tree(&output)),
            // svnlook fails for paths that do not exist in the revision.
            Err(SourceError::CommandFailed { .. }) => Ok((NodeKind::None, Vec::new())),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RevisionSource for SvnlookSource {
    #[instrument(skip(self), fields(repository = %self.repository.display()))]
    async fn latest_revision(&self) -> Result<Revnum, SourceError> {
        let output = self.run_text(self.command("youngest", None)).await?;
        parse_youngest(&output)
    }

    #[instrument(skip(self))]
    async fn changed_paths(&self, revision: Revnum) -> Result<Vec<ChangeRecord>, SourceError> {
        let mut cmd = self.command("changed", Some(revision));
        cmd.arg("--copy-info");
        let output = self.run_text(cmd).await.map_err(|e| match e {
            SourceError::CommandFailed { .. } => SourceError::RevisionNotFound(revision),
            other => other,
        })?;
        let changes = parse_changed(&output)?;
        debug!(revision, count = changes.len(), "read changed paths");
        Ok(changes)
    }

    async fn node_kind(&self, revision: Revnum, path: &str) -> Result<NodeKind, SourceError> {
        Ok(self.tree(revision, path).await?.0)
    }

    async fn list_directory(&self, revision: Revnum, path: &str) -> Result<Vec<DirEntry>, SourceError> {
        match self.tree(revision, path).await? {
            (NodeKind::Directory, entries) => Ok(entries),
            _ => Err(SourceError::PathNotFound {
                path: path.to_string(),
                revision,
            }),
        }
    }

    async fn file_length(&self, revision: Revnum, path: &str) -> Result<u64, SourceError> {
        let mut cmd = self.command("filesize", Some(revision));
        cmd.arg(path);
        let output = self.run_text(cmd).await?;
        output
            .trim()
            .parse()
            .map_err(|_| SourceError::ParseError(format!("bad file size for {path}: {output:?}")))
    }

    #[instrument(skip(self))]
    async fn file_contents(&self, revision: Revnum, path: &str) -> Result<ContentStream, SourceError> {
        let mut cmd = self.command("cat", Some(revision));
        cmd.arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::IoError(std::io::Error::other("svnlook cat produced no stdout"))
        })?;
        Ok(Box::new(CatStream {
            _child: child,
            stdout,
        }))
    }

    async fn properties(&self, revision: Revnum, path: &str) -> Result<Properties, SourceError> {
        let mut cmd = self.command("proplist", Some(revision));
        cmd.arg(path);
        let names = parse_proplist(&self.run_text(cmd).await?);

        let mut props = Properties::new();
        for name in names {
            let mut cmd = self.command("propget", Some(revision));
            cmd.arg(&name).arg(path);
            match self.run(cmd).await {
                Ok(value) => {
                    props.insert(name, value);
                }
                Err(SourceError::CommandFailed { stderr, .. }) => {
                    warn!(path, revision, property = %name, %stderr, "cannot read property");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(props)
    }

    async fn revision_metadata(&self, revision: Revnum) -> Result<RevisionMetadata, SourceError> {
        let author = self.run_text(self.command("author", Some(revision))).await?;
        let date = self.run_text(self.command("date", Some(revision))).await?;
        let mut message = self.run(self.command("log", Some(revision))).await?;
        // svnlook terminates the log with one extra newline.
        if message.last() == Some(&b'\n') {
            message.pop();
        }

        let author = author.trim();
        Ok(RevisionMetadata {
            author: (!author.is_empty()).then(|| author.to_string()),
            epoch: parse_date(&date)?,
            message,
        })
    }
}

/// Standard output of a running `svnlook cat`; the child is killed if the
/// stream is dropped early.
struct CatStream {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for CatStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary() {
        let source = SvnlookSource::new("/nonexistent/repo").with_binary("svnlook-does-not-exist");
        let err = source.latest_revision().await.unwrap_err();
        assert!(matches!(err, SourceError::BinaryNotFound(_)));
    }

    #[tokio::test]
    async fn test_revision_zero_has_no_nodes() {
        let source = SvnlookSource::new("/nonexistent/repo");
        assert_eq!(source.node_kind(0, "/trunk").await.unwrap(), NodeKind::None);
        assert!(!source.was_directory(0, "/trunk").await.unwrap());
    }

    fn tool_available(name: &str) -> bool {
        std::process::Command::new(name)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_fresh_repository() {
        if !tool_available("svnadmin") || !tool_available("svnlook") {
            eprintln!("svnadmin/svnlook not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        let status = std::process::Command::new("svnadmin")
            .arg("create")
            .arg(&repo)
            .status()
            .unwrap();
        assert!(status.success());

        let source = SvnlookSource::new(&repo);
        assert_eq!(source.latest_revision().await.unwrap(), 0);
        assert!(matches!(
            source.changed_paths(1).await.unwrap_err(),
            SourceError::RevisionNotFound(1)
        ));
    }
}
