//! Staging file contents from the source tree into a transaction.

use std::future::Future;
use std::pin::Pin;

use tokio::io::AsyncReadExt;
use tracing::{trace, warn};

use crate::config::OutputMode;
use crate::errors::ExportError;
use crate::ledger::{BranchLedger, Transaction};
use crate::source::{ContentStream, RevisionSource};
use crate::Revnum;

pub const MODE_FILE: u32 = 0o100644;
pub const MODE_EXECUTABLE: u32 = 0o100755;
pub const MODE_SYMLINK: u32 = 0o120000;

const LINK_PREFIX: &[u8] = b"link ";

pub(crate) type ExportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExportError>> + 'a>>;

/// Stage the file at `svn_path` as `final_path`.
///
/// `svn:executable` files get mode 755. An `svn:special` file whose content
/// starts with `link ` becomes a symlink to the rest of the content.
pub async fn dump_blob(
    source: &dyn RevisionSource,
    txn: &mut Transaction,
    ledger: &mut BranchLedger,
    revision: Revnum,
    svn_path: &str,
    final_path: &str,
) -> Result<(), ExportError> {
    let props = source.properties(revision, svn_path).await?;
    let mut mode = if props.contains_key("svn:executable") {
        MODE_EXECUTABLE
    } else {
        MODE_FILE
    };
    let mut length = source.file_length(revision, svn_path).await?;

    let dry_run = ledger.layout().mode == OutputMode::DryRun;
    let mut content: ContentStream = if dry_run {
        Box::new(tokio::io::empty())
    } else {
        source.file_contents(revision, svn_path).await?
    };

    if props.contains_key("svn:special") && !dry_run {
        let mut head = [0u8; LINK_PREFIX.len()];
        match content.read_exact(&mut head).await {
            Ok(_) if head == LINK_PREFIX => {
                mode = MODE_SYMLINK;
                length -= LINK_PREFIX.len() as u64;
            }
            _ => {
                warn!(path = svn_path, revision, "file is svn:special but not a symlink");
                content = source.file_contents(revision, svn_path).await?;
            }
        }
    }

    trace!(path = svn_path, final_path, mode, length, "staging blob");
    txn.add_file(ledger, final_path, mode, length, &mut content).await?;
    Ok(())
}

/// Stage every file below the directory `svn_path` under `final_path`,
/// which is empty or ends in `/`.
pub fn dump_dir<'a>(
    source: &'a dyn RevisionSource,
    txn: &'a mut Transaction,
    ledger: &'a mut BranchLedger,
    revision: Revnum,
    svn_path: &'a str,
    final_path: &'a str,
) -> ExportFuture<'a> {
    Box::pin(async move {
        for entry in source.list_directory(revision, svn_path).await? {
            let child = child_path(svn_path, &entry.name);
            if entry.is_directory {
                let final_child = format!("{final_path}{}/", entry.name);
                dump_dir(source, txn, ledger, revision, &child, &final_child).await?;
            } else {
                let final_child = format!("{final_path}{}", entry.name);
                dump_blob(source, txn, ledger, revision, &child, &final_child).await?;
            }
        }
        Ok(())
    })
}

/// Stage `<final_path>.gitignore`.
///
/// With `content` the file holds the `svn:ignore` value. Without it an empty
/// file is staged, but only if the directory has no children. Returns whether
/// a file was staged.
pub async fn add_gitignore(
    source: &dyn RevisionSource,
    txn: &mut Transaction,
    ledger: &mut BranchLedger,
    revision: Revnum,
    svn_path: &str,
    final_path: &str,
    content: Option<&[u8]>,
) -> Result<bool, ExportError> {
    let data = match content {
        Some(content) => content.to_vec(),
        None => {
            if !source.list_directory(revision, svn_path).await?.is_empty() {
                return Ok(false);
            }
            Vec::new()
        }
    };

    let length = data.len() as u64;
    let mut stream: ContentStream = Box::new(std::io::Cursor::new(data));
    let path = format!("{final_path}.gitignore");
    txn.add_file(ledger, &path, MODE_FILE, length, &mut stream).await?;
    Ok(true)
}

/// Warn about every property of `svn_path` that has no git counterpart.
pub async fn check_properties(
    source: &dyn RevisionSource,
    revision: Revnum,
    svn_path: &str,
) -> Result<(), ExportError> {
    for (name, value) in source.properties(revision, svn_path).await? {
        if name != "svn:ignore" {
            warn!(
                path = svn_path,
                revision,
                property = %name,
                value = %String::from_utf8_lossy(&value),
                "unknown svn property"
            );
        }
    }
    Ok(())
}

pub(crate) fn child_path(parent: &str, name: &str) -> String {
    format!("{}/{name}", parent.trim_end_matches('/'))
}
