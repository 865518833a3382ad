//! Parsers for `svnlook` output.

use chrono::DateTime;

use super::{ChangeKind, ChangeRecord, DirEntry, NodeKind};
use crate::errors::SourceError;
use crate::Revnum;

/// Parse `svnlook youngest`.
pub fn parse_youngest(output: &str) -> Result<Revnum, SourceError> {
    output
        .trim()
        .parse()
        .map_err(|_| SourceError::ParseError(format!("bad youngest revision: {:?}", output.trim())))
}

/// Parse `svnlook changed --copy-info`.
///
/// Each entry is `XYC path` where `X` is the action, `Y` is `U` when
/// properties changed and `C` is `+` for copies. A copy is followed by an
/// indented `(from path:rN)` line. Directories carry a trailing slash.
pub fn parse_changed(output: &str) -> Result<Vec<ChangeRecord>, SourceError> {
    let mut changes: Vec<ChangeRecord> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(from) = line.trim_start().strip_prefix("(from ") {
            let from = from.trim_end().trim_end_matches(')');
            let (path, rev) = from
                .rsplit_once(":r")
                .ok_or_else(|| SourceError::ParseError(format!("bad copy source: {line}")))?;
            let rev: Revnum = rev
                .parse()
                .map_err(|_| SourceError::ParseError(format!("bad copy revision: {line}")))?;
            let last = changes
                .last_mut()
                .ok_or_else(|| SourceError::ParseError(format!("copy source without entry: {line}")))?;
            last.copied_from = Some((normalize(path), rev));
            continue;
        }

        let bytes = line.as_bytes();
        if bytes.len() < 5 {
            return Err(SourceError::ParseError(format!("short changed line: {line:?}")));
        }
        let kind = match bytes[0] {
            b'A' => ChangeKind::Add,
            b'D' => ChangeKind::Delete,
            b'R' => ChangeKind::Replace,
            b'U' | b'_' => ChangeKind::Modify,
            other => {
                return Err(SourceError::ParseError(format!(
                    "unknown change action '{}' in {line:?}",
                    other as char
                )))
            }
        };
        let raw_path = &line[4..];
        changes.push(ChangeRecord {
            path: normalize(raw_path),
            kind,
            is_directory: raw_path.ends_with('/'),
            copied_from: None,
            properties_modified: bytes[1] == b'U',
        });
    }

    Ok(changes)
}

/// Parse `svnlook tree --non-recursive --full-paths`: the first line is the
/// node itself, the rest are its children.
pub fn parse_tree(output: &str) -> (NodeKind, Vec<DirEntry>) {
    // Names may begin or end with spaces; only the terminator is dropped.
    let mut lines = output
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty());
    let kind = match lines.next() {
        None => return (NodeKind::None, Vec::new()),
        Some(first) if first.ends_with('/') => NodeKind::Directory,
        Some(_) => NodeKind::File,
    };

    let mut entries: Vec<DirEntry> = lines
        .map(|line| {
            let is_directory = line.ends_with('/');
            let trimmed = line.trim_end_matches('/');
            let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
            DirEntry {
                name: name.to_string(),
                is_directory,
            }
        })
        .collect();
    entries.sort();
    (kind, entries)
}

/// Parse `svnlook date`, e.g. `2008-01-01 12:34:56 +0100 (Tue, 01 Jan 2008)`.
pub fn parse_date(output: &str) -> Result<i64, SourceError> {
    let stamp = output.split(" (").next().unwrap_or("").trim();
    if stamp.is_empty() {
        return Ok(0);
    }
    DateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S %z")
        .map(|dt| dt.timestamp())
        .map_err(|e| SourceError::ParseError(format!("bad date {stamp:?}: {e}")))
}

/// Parse `svnlook proplist` (names only).
pub fn parse_proplist(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// `trunk/src/` -> `/trunk/src`
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{trimmed}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_changed_with_copies() {
        let output = "\
A   trunk/
A   trunk/README
U   trunk/main.c
_U  trunk/lib/
UU  trunk/lib/util.c
D   trunk/old/
A + branches/stable/
    (from trunk/:r41)
R + tags/v1/
    (from branches/stable/:r42)
";
        let changes = parse_changed(output).unwrap();
        assert_eq!(changes.len(), 9);

        assert_eq!(changes[0].path, "/trunk");
        assert!(changes[0].is_directory);
        assert_eq!(changes[0].kind, ChangeKind::Add);

        assert_eq!(changes[1].path, "/trunk/README");
        assert!(!changes[1].is_directory);

        assert_eq!(changes[3].kind, ChangeKind::Modify);
        assert!(changes[3].properties_modified);
        assert!(changes[4].properties_modified);
        assert!(!changes[2].properties_modified);

        assert_eq!(changes[5].kind, ChangeKind::Delete);
        assert!(changes[5].is_directory);

        assert_eq!(changes[6].copied_from, Some(("/trunk".to_string(), 41)));
        assert_eq!(changes[7].kind, ChangeKind::Replace);
        assert_eq!(changes[7].copied_from, Some(("/branches/stable".to_string(), 42)));
    }

    #[test]
    fn test_parse_changed_rejects_garbage() {
        assert!(parse_changed("X   trunk/\n").is_err());
        assert!(parse_changed("    (from trunk/:r1)\n").is_err());
        assert!(parse_changed("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_tree_directory() {
        let output = "trunk/\ntrunk/zeta.c\ntrunk/alpha/\ntrunk/beta.txt\n";
        let (kind, entries) = parse_tree(output);
        assert_eq!(kind, NodeKind::Directory);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta.txt", "zeta.c"]);
        assert!(entries[0].is_directory);
        assert!(!entries[1].is_directory);
    }

    #[test]
    fn test_parse_tree_keeps_spaces_in_names() {
        let output = "trunk/\ntrunk/ lead.txt\ntrunk/trail.txt \r\ntrunk/odd dir /\n";
        let (kind, entries) = parse_tree(output);
        assert_eq!(kind, NodeKind::Directory);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![" lead.txt", "odd dir ", "trail.txt "]);
        assert!(entries[1].is_directory);
    }

    #[test]
    fn test_parse_tree_file_and_missing() {
        let (kind, entries) = parse_tree("trunk/a.c\n");
        assert_eq!(kind, NodeKind::File);
        assert!(entries.is_empty());

        assert_eq!(parse_tree("").0, NodeKind::None);
    }

    #[test]
    fn test_parse_date() {
        let epoch = parse_date("2008-01-01 12:00:00 +0100 (Tue, 01 Jan 2008)\n").unwrap();
        assert_eq!(epoch, 1_199_185_200);
        assert_eq!(parse_date("\n").unwrap(), 0);
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_parse_youngest_and_proplist() {
        assert_eq!(parse_youngest("1234\n").unwrap(), 1234);
        assert!(parse_youngest("abc").is_err());
        assert_eq!(
            parse_proplist("  svn:executable\n  svn:mime-type\n"),
            vec!["svn:executable", "svn:mime-type"]
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("trunk/src/"), "/trunk/src");
        assert_eq!(normalize("/trunk"), "/trunk");
        assert_eq!(normalize("/"), "/");
    }
}
