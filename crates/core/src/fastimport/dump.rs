//! Sinks that write the stream to a file instead of an importer.
//!
//! In dump mode the file is `<repo>.fi` and can be fed to `git fast-import`
//! later. In dry-run mode the stream goes to the progress log without blob
//! payloads, which is enough to inspect routing decisions and to resume.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use super::commands;
use super::sink::{ensure_parent, OutputLayout, Sink, SinkFactory};
use crate::config::OutputMode;
use crate::errors::SinkError;

pub struct FileSink {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    blobs: bool,
}

impl FileSink {
    /// Open `path` for appending.
    pub async fn open(path: PathBuf, blobs: bool) -> Result<Self, SinkError> {
        ensure_parent(&path).await?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), blobs, "opened stream file");
        Ok(Self {
            path,
            file: Some(BufWriter::new(file)),
            blobs,
        })
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>, SinkError> {
        self.file.as_mut().ok_or_else(|| {
            SinkError::IoError(std::io::Error::other(format!(
                "{} is already closed",
                self.path.display()
            )))
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.file()?.write_all(data).await?;
        Ok(())
    }

    fn accepts_blobs(&self) -> bool {
        self.blobs
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.file()?.flush().await?;
        Ok(())
    }

    async fn checkpoint(&mut self) -> Result<(), SinkError> {
        self.write_all(&commands::checkpoint()).await?;
        self.flush().await
    }

    /// A stream file may be reopened after eviction, so closing only
    /// checkpoints; `done` would stop an importer reading the whole file.
    async fn close(&mut self) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Ok(());
        }
        self.checkpoint().await?;
        self.file = None;
        info!(path = %self.path.display(), "stream file closed");
        Ok(())
    }
}

/// Opens [`FileSink`]s for dump and dry-run modes.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    layout: OutputLayout,
}

impl FileSinkFactory {
    pub fn new(work_dir: impl Into<PathBuf>, mode: OutputMode) -> Self {
        Self {
            layout: OutputLayout::new(work_dir, mode),
        }
    }
}

#[async_trait]
impl SinkFactory for FileSinkFactory {
    fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    async fn open(&self, repository: &str) -> Result<Box<dyn Sink>, SinkError> {
        let blobs = self.layout.mode != OutputMode::DryRun;
        let sink = FileSink::open(self.layout.log_file(repository), blobs).await?;
        Ok(Box::new(sink))
    }
}
