//! Terminal styling for command output.

use console::{style, Style};

use svnport_core::config::OutputMode;

/// A finished step, prefixed with a green check mark.
pub fn done(msg: &str) -> String {
    format!("{} {msg}", style("✓").green())
}

/// A fatal error, prefixed with a red cross.
pub fn failure(msg: &str) -> String {
    format!("{} {msg}", style("✗").red().bold())
}

/// A stopped run that can be continued.
pub fn interrupted(msg: &str) -> String {
    format!("{} {msg}", style("⏸").yellow())
}

pub fn title(msg: &str) -> String {
    style(msg).bold().underlined().to_string()
}

/// A rule that never matched: dimmed, and flagged in yellow.
pub fn unused_rule(line: &str) -> String {
    format!("{} {}", Style::new().dim().apply_to(line), style("(unused)").yellow())
}

/// Output mode as shown in summaries; dry runs stand out.
pub fn mode(mode: OutputMode) -> String {
    match mode {
        OutputMode::FastImport => style("git fast-import").cyan().to_string(),
        OutputMode::Dump => style("stream files (.fi)").cyan().to_string(),
        OutputMode::DryRun => style("dry run").magenta().bold().to_string(),
    }
}
