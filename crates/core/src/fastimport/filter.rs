//! External commit message filter.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::errors::SinkError;

/// A shell command that receives a message on stdin and prints the
/// replacement on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter {
    command: String,
}

impl MessageFilter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    #[instrument(skip(self, message), fields(command = %self.command, len = message.len()))]
    pub async fn apply(&self, message: &[u8]) -> Result<Vec<u8>, SinkError> {
        let fail = |detail: String| SinkError::MessageFilter {
            command: self.command.clone(),
            detail,
        };

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| fail(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message)
                .await
                .map_err(|e| fail(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !output.status.success() {
            return Err(fail(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(out_len = output.stdout.len(), "message filtered");
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filter_rewrites_message() {
        let filter = MessageFilter::new("tr a-z A-Z");
        let out = filter.apply(b"fix crash\n").await.unwrap();
        assert_eq!(out, b"FIX CRASH\n");
    }

    #[tokio::test]
    async fn test_filter_failure() {
        let filter = MessageFilter::new("exit 3");
        let err = filter.apply(b"msg\n").await.unwrap_err();
        assert!(matches!(err, SinkError::MessageFilter { .. }));
    }
}
