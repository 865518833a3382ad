//! Formatting of `git fast-import` commands.
//!
//! Every function returns the exact bytes of one command, including the
//! terminating newlines. Payloads announced with `data <n>` are written by
//! the caller right after the header.

use crate::Revnum;

/// Object id used as the `from` of a deleted branch.
pub const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// Ref holding the per-commit metadata notes.
pub const NOTES_REF: &str = "refs/notes/commits";

pub const CHECKPOINT: &[u8] = b"checkpoint\n";

/// Marker echoed back by the importer after a checkpoint.
pub const PROGRESS_COMPLETE: &str = "progress complete";

pub const DONE: &[u8] = b"done\n";

pub const DELETE_ALL: &[u8] = b"deleteall\n";

/// `main` -> `refs/heads/main`; names already under `refs/` are kept.
pub fn branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

/// `svn path=<prefix>; revision=<rev>[; tag=<tag>]` plus a newline.
pub fn metadata_message(svnprefix: &str, revision: Revnum, tag: Option<&str>) -> String {
    let mut msg = format!("svn path={svnprefix}; revision={revision}");
    if let Some(tag) = tag.filter(|t| !t.is_empty()) {
        msg.push_str("; tag=");
        msg.push_str(tag);
    }
    msg.push('\n');
    msg
}

/// Append a newline unless `message` already ends with one.
pub fn terminate(message: &mut Vec<u8>) {
    if message.last() != Some(&b'\n') {
        message.push(b'\n');
    }
}

pub fn blob_header(mark: u64, length: u64) -> String {
    format!("blob\nmark :{mark}\ndata {length}\n")
}

/// `commit` header up to and including the message payload.
pub fn commit(git_ref: &str, mark: u64, committer: &str, epoch: i64, message: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "commit {git_ref}\nmark :{mark}\ncommitter {committer} {epoch} +0000\ndata {}\n",
        message.len()
    )
    .into_bytes();
    out.extend_from_slice(message);
    out.push(b'\n');
    out
}

pub fn merge(mark: u64) -> String {
    format!("merge :{mark}\n")
}

pub fn file_modify(mode: u32, mark: u64, path: &str) -> String {
    format!("M {mode:o} :{mark} {path}\n")
}

pub fn file_delete(path: &str) -> String {
    format!("D {path}\n")
}

/// `reset` to a mark (`:<n>`), a ref or [`NULL_SHA`].
pub fn reset(git_ref: &str, from: &str) -> String {
    format!("reset {git_ref}\nfrom {from}\n\n")
}

/// The durable record of a branch update, parsed again on resume.
pub fn revision_progress(revision: Revnum, branch: &str, mark: u64, comment: &str) -> String {
    if comment.is_empty() {
        format!("progress SVN r{revision} branch {branch} = :{mark}\n\n")
    } else {
        format!("progress SVN r{revision} branch {branch} = :{mark} # {comment}\n\n")
    }
}

/// The durable record of a written annotated tag.
pub fn tag_progress(revision: Revnum, name: &str) -> String {
    format!("progress SVN tag {name} at r{revision}\n\n")
}

/// Annotated tag header up to and including the message payload.
pub fn tag(name: &str, from: &str, tagger: &str, epoch: i64, message: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "progress Creating annotated tag {name} from ref {from}\n\
         tag {name}\nfrom {from}\ntagger {tagger} {epoch} +0000\ndata {}\n",
        message.len()
    )
    .into_bytes();
    out.extend_from_slice(message);
    out.push(b'\n');
    out
}

/// Commit on [`NOTES_REF`] attaching `text` to the tip of `target`.
pub fn note_commit(
    notes_mark: u64,
    committer: &str,
    epoch: i64,
    target: &str,
    text: &[u8],
    appending: bool,
) -> Vec<u8> {
    let verb = if appending { "Appending" } else { "Adding" };
    let message = format!("{verb} Git note for current {target}\n");
    let mut out = format!(
        "commit {NOTES_REF}\nmark :{notes_mark}\ncommitter {committer} {epoch} +0000\ndata {}\n{message}\n",
        message.len()
    )
    .into_bytes();
    out.extend_from_slice(format!("N inline {target}\ndata {}\n", text.len()).as_bytes());
    out.extend_from_slice(text);
    out.push(b'\n');
    out
}

/// Re-announce a branch tip to a freshly started importer.
pub fn reload(git_ref: &str, mark: u64) -> String {
    format!("reset {git_ref}\nfrom :{mark}\n\nprogress Branch {git_ref} reloaded\n")
}

/// Checkpoint followed by the marker the importer echoes when it is done.
pub fn checkpoint() -> Vec<u8> {
    let mut out = CHECKPOINT.to_vec();
    out.extend_from_slice(PROGRESS_COMPLETE.as_bytes());
    out.push(b'\n');
    out
}
