//! Destinations for the command stream.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::config::OutputMode;
use crate::errors::SinkError;
use crate::source::ContentStream;

const COPY_CHUNK: usize = 64 * 1024;

/// Receives the command stream of one output repository.
#[async_trait]
pub trait Sink: Send {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), SinkError>;

    /// Copy exactly `length` bytes of `content`. A stream that ends early is
    /// an error; extra bytes are left unread.
    async fn write_stream(
        &mut self,
        length: u64,
        content: &mut ContentStream,
        path: &str,
    ) -> Result<(), SinkError> {
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;
        while copied < length {
            let want = (length - copied).min(COPY_CHUNK as u64) as usize;
            let n = content.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(SinkError::ShortContent {
                    path: path.to_string(),
                    expected: length,
                    actual: copied,
                });
            }
            self.write_all(&buf[..n]).await?;
            copied += n as u64;
        }
        Ok(())
    }

    /// Whether blob payloads are wanted at all. Dry runs skip them.
    fn accepts_blobs(&self) -> bool {
        true
    }

    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Ask the importer to write everything to disk and wait until it has.
    async fn checkpoint(&mut self) -> Result<(), SinkError>;

    /// Checkpoint, end the stream and release the sink.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Where a repository's marks, progress log and log backup live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub work_dir: PathBuf,
    pub mode: OutputMode,
}

impl OutputLayout {
    pub fn new(work_dir: impl Into<PathBuf>, mode: OutputMode) -> Self {
        Self {
            work_dir: work_dir.into(),
            mode,
        }
    }

    fn flat(name: &str) -> String {
        name.replace('/', "_")
    }

    /// The bare repository directory.
    pub fn repository_dir(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    /// `<work_dir>/<name>/marks-<name>`
    pub fn marks_file(&self, name: &str) -> PathBuf {
        self.repository_dir(name)
            .join(format!("marks-{}", Self::flat(name)))
    }

    /// `<work_dir>/log-<name>`, or `<work_dir>/<name>.fi` when dumping.
    pub fn log_file(&self, name: &str) -> PathBuf {
        match self.mode {
            OutputMode::Dump => self.work_dir.join(format!("{}.fi", Self::flat(name))),
            _ => self.work_dir.join(format!("log-{}", Self::flat(name))),
        }
    }

    /// `<log>.old`
    pub fn backup_file(&self, name: &str) -> PathBuf {
        let mut path = self.log_file(name).into_os_string();
        path.push(".old");
        PathBuf::from(path)
    }
}

/// Creates repositories and opens sinks for them.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    fn layout(&self) -> &OutputLayout;

    /// Called once per direct repository before anything is written to it.
    async fn prepare(&self, _repository: &str, _description: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn open(&self, repository: &str) -> Result<Box<dyn Sink>, SinkError>;
}

/// Create the parent directory of `path` if needed.
pub(crate) async fn ensure_parent(path: &Path) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_names() {
        let layout = OutputLayout::new("/work", OutputMode::FastImport);
        assert_eq!(
            layout.marks_file("kde/libs"),
            PathBuf::from("/work/kde/libs/marks-kde_libs")
        );
        assert_eq!(layout.log_file("kde/libs"), PathBuf::from("/work/log-kde_libs"));
        assert_eq!(layout.backup_file("kde/libs"), PathBuf::from("/work/log-kde_libs.old"));

        let dump = OutputLayout::new("/work", OutputMode::Dump);
        assert_eq!(dump.log_file("lib"), PathBuf::from("/work/lib.fi"));
        assert_eq!(dump.backup_file("lib"), PathBuf::from("/work/lib.fi.old"));
    }

    struct VecSink(Vec<u8>);

    #[async_trait]
    impl Sink for VecSink {
        async fn write_all(&mut self, data: &[u8]) -> Result<(), SinkError> {
            self.0.extend_from_slice(data);
            Ok(())
        }
        async fn flush(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
        async fn checkpoint(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_write_stream_exact_length() {
        let mut sink = VecSink(Vec::new());
        let mut content: ContentStream = Box::new(std::io::Cursor::new(b"hello world".to_vec()));
        sink.write_stream(5, &mut content, "a.txt").await.unwrap();
        assert_eq!(sink.0, b"hello");
    }

    #[tokio::test]
    async fn test_write_stream_short() {
        let mut sink = VecSink(Vec::new());
        let mut content: ContentStream = Box::new(std::io::Cursor::new(b"abc".to_vec()));
        let err = sink.write_stream(10, &mut content, "a.txt").await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::ShortContent { expected: 10, actual: 3, .. }
        ));
    }
}
