//! `git fast-import` running as a child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::commands::{self, PROGRESS_COMPLETE};
use super::sink::{ensure_parent, OutputLayout, Sink, SinkFactory};
use crate::config::{OutputConfig, OutputMode};
use crate::errors::SinkError;

/// Launch settings shared by every importer process.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub program: String,
    pub max_pack_size: Option<String>,
    pub close_timeout: Duration,
    pub kill_timeout: Duration,
}

impl ProcessOptions {
    pub fn from_config(output: &OutputConfig) -> Self {
        Self {
            program: "git".into(),
            max_pack_size: output.max_pack_size.clone(),
            close_timeout: Duration::from_secs(output.close_timeout_secs),
            kill_timeout: Duration::from_secs(output.kill_timeout_secs),
        }
    }
}

/// Opens [`ProcessSink`]s inside bare repositories under the work directory.
#[derive(Debug, Clone)]
pub struct ProcessSinkFactory {
    layout: OutputLayout,
    options: ProcessOptions,
}

impl ProcessSinkFactory {
    pub fn new(work_dir: impl Into<PathBuf>, options: ProcessOptions) -> Self {
        Self {
            layout: OutputLayout::new(work_dir, OutputMode::FastImport),
            options,
        }
    }
}

#[async_trait]
impl SinkFactory for ProcessSinkFactory {
    fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Initialise the bare repository and an empty marks file, once.
    async fn prepare(&self, repository: &str, description: &str) -> Result<(), SinkError> {
        let dir = self.layout.repository_dir(repository);
        if dir.exists() {
            return Ok(());
        }

        info!(repository, path = %dir.display(), "creating new repository");
        tokio::fs::create_dir_all(&dir).await?;
        git2::Repository::init_bare(&dir).map_err(|source| SinkError::RepositoryInit {
            path: dir.display().to_string(),
            source,
        })?;

        if !description.is_empty() {
            tokio::fs::write(dir.join("description"), format!("{description}\n")).await?;
        }
        tokio::fs::write(self.layout.marks_file(repository), b"").await?;
        Ok(())
    }

    async fn open(&self, repository: &str) -> Result<Box<dyn Sink>, SinkError> {
        let sink = ProcessSink::spawn(
            repository,
            &self.layout.repository_dir(repository),
            &self.layout.marks_file(repository),
            &self.layout.log_file(repository),
            &self.options,
        )
        .await?;
        Ok(Box::new(sink))
    }
}

/// A running importer. Its output is appended to the progress log.
pub struct ProcessSink {
    repository: String,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    acks: mpsc::UnboundedReceiver<()>,
    readers: Vec<JoinHandle<()>>,
    close_timeout: Duration,
    kill_timeout: Duration,
}

impl ProcessSink {
    #[instrument(skip(options), fields(program = %options.program))]
    pub async fn spawn(
        repository: &str,
        dir: &Path,
        marks: &Path,
        log: &Path,
        options: &ProcessOptions,
    ) -> Result<Self, SinkError> {
        let mut cmd = Command::new(&options.program);
        cmd.arg("fast-import")
            .arg(format!("--import-marks-if-exists={}", marks.display()))
            .arg(format!("--export-marks={}", marks.display()))
            .arg("--force");
        if let Some(size) = &options.max_pack_size {
            cmd.arg(format!("--max-pack-size={size}"));
        }
        cmd.current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = ?cmd.as_std(), "starting importer");
        let mut child = cmd.spawn().map_err(|source| SinkError::SpawnFailed {
            repository: repository.to_string(),
            source,
        })?;

        ensure_parent(log).await?;
        let (tx, acks) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, log.to_path_buf(), Some(tx))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, log.to_path_buf(), None)));
        }
        let stdin = child.stdin.take().map(BufWriter::new);

        info!(repository, pid = ?child.id(), "importer started");
        Ok(Self {
            repository: repository.to_string(),
            child,
            stdin,
            acks,
            readers,
            close_timeout: options.close_timeout,
            kill_timeout: options.kill_timeout,
        })
    }

    fn died(&self) -> SinkError {
        SinkError::ProcessDied(self.repository.clone())
    }

    fn stdin(&mut self) -> Result<&mut BufWriter<ChildStdin>, SinkError> {
        let repository = self.repository.clone();
        self.stdin
            .as_mut()
            .ok_or(SinkError::ProcessDied(repository))
    }

    fn map_write(&self, e: std::io::Error) -> SinkError {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            self.died()
        } else {
            SinkError::IoError(e)
        }
    }

    async fn wait_for_exit(&mut self) {
        match tokio::time::timeout(self.close_timeout, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(repository = %self.repository, "importer exited");
                return;
            }
            Ok(Ok(status)) => {
                warn!(repository = %self.repository, %status, "importer exited with failure");
                return;
            }
            Ok(Err(e)) => {
                error!(repository = %self.repository, error = %e, "cannot wait for importer");
                return;
            }
            Err(_) => {
                warn!(repository = %self.repository, "importer did not exit in time, terminating");
            }
        }

        if let Err(e) = self.child.start_kill() {
            warn!(repository = %self.repository, error = %e, "cannot terminate importer");
        }
        if tokio::time::timeout(self.kill_timeout, self.child.wait())
            .await
            .is_err()
        {
            warn!(repository = %self.repository, "importer did not die");
        }
    }
}

/// Append every line of `reader` to `log`, signalling each checkpoint marker.
async fn pump<R>(reader: R, log: PathBuf, acks: Option<mpsc::UnboundedSender<()>>)
where
    R: AsyncRead + Unpin,
{
    let mut file = match OpenOptions::new().create(true).append(true).open(&log).await {
        Ok(file) => file,
        Err(e) => {
            error!(path = %log.display(), error = %e, "cannot open progress log");
            return;
        }
    };

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    error!(path = %log.display(), error = %e, "cannot append to progress log");
                }
                if line == PROGRESS_COMPLETE {
                    if let Some(tx) = &acks {
                        let _ = tx.send(());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "importer output is unreadable");
                break;
            }
        }
    }
    let _ = file.flush().await;
}

#[async_trait]
impl Sink for ProcessSink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let result = self.stdin()?.write_all(data).await;
        result.map_err(|e| self.map_write(e))
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        let result = self.stdin()?.flush().await;
        result.map_err(|e| self.map_write(e))
    }

    async fn checkpoint(&mut self) -> Result<(), SinkError> {
        self.write_all(&commands::checkpoint()).await?;
        self.flush().await?;
        match tokio::time::timeout(self.close_timeout, self.acks.recv()).await {
            Ok(Some(())) => {
                debug!(repository = %self.repository, "checkpoint complete");
                Ok(())
            }
            Ok(None) => Err(self.died()),
            Err(_) => {
                warn!(repository = %self.repository, "importer did not acknowledge checkpoint");
                Err(SinkError::CheckpointTimeout {
                    repository: self.repository.clone(),
                    secs: self.close_timeout.as_secs(),
                })
            }
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.stdin.is_none() {
            return Ok(());
        }
        let flushed = async {
            self.checkpoint().await?;
            self.write_all(commands::DONE).await?;
            self.flush().await
        }
        .await;

        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        self.wait_for_exit().await;
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        info!(repository = %self.repository, "importer closed");
        flushed
    }
}
