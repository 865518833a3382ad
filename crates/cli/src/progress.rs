//! Per-revision progress on stdout.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use svnport_core::RevisionSummary;

/// A bar whose position is the last exported revision, up to `last`.
pub fn revision_bar(last: i64) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(last.max(0) as u64), ProgressDrawTarget::stdout());
    let style = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] {bar:40.cyan/blue} r{pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

/// Move to `summary`'s revision; revisions that produced commits are
/// printed above the bar when `verbose`.
pub fn record(bar: &ProgressBar, summary: &RevisionSummary, verbose: bool) {
    bar.set_position(summary.revision.max(0) as u64);
    bar.set_message(format!("{} commit(s)", summary.commits.len()));
    if verbose && !summary.is_empty() {
        bar.println(summary.to_string());
    }
}
