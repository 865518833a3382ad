//! Author map file reader.
//!
//! Two formats are accepted. The classic one has one author per line:
//!
//! ```text
//! # svn user   git identity
//! jdoe         John Doe <jdoe@example.com>
//! ```
//!
//! The TOML one has an `[authors]` table:
//!
//! ```toml
//! [authors]
//! jdoe = { name = "John Doe", email = "jdoe@example.com" }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::IdentityError;

/// A single author entry in the mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorEntry {
    /// Git display name.
    pub name: String,
    /// Git email address.
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
struct TomlAuthors {
    #[serde(default)]
    authors: HashMap<String, AuthorEntry>,
}

/// Loader for author map files.
pub struct MappingFile;

impl MappingFile {
    /// Load the mapping file from disk and return the author map.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<HashMap<String, AuthorEntry>, IdentityError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading identity mapping file");

        if !path.exists() {
            return Err(IdentityError::MappingFileError {
                path: path.display().to_string(),
                detail: "file not found".into(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let authors = if path.extension().is_some_and(|ext| ext == "toml") {
            parse_toml(&contents)?
        } else {
            parse_lines(&contents)
        };

        debug!(count = authors.len(), "loaded author mappings");
        Ok(authors)
    }
}

/// Parse the TOML `[authors]` format.
pub fn parse_toml(contents: &str) -> Result<HashMap<String, AuthorEntry>, IdentityError> {
    let data: TomlAuthors =
        toml::from_str(contents).map_err(|e| IdentityError::ParseError(e.to_string()))?;
    Ok(data.authors)
}

/// Parse the line format. Lines that do not look like `user Name <email>`
/// are skipped with a warning.
pub fn parse_lines(contents: &str) -> HashMap<String, AuthorEntry> {
    let mut authors = HashMap::new();

    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some((user, entry)) => {
                authors.insert(user, entry);
            }
            None => warn!(line = idx + 1, text = %raw, "skipping malformed identity line"),
        }
    }

    authors
}

fn parse_line(line: &str) -> Option<(String, AuthorEntry)> {
    let (user, identity) = line.split_once(char::is_whitespace)?;
    let identity = identity.trim();
    let open = identity.rfind('<')?;
    let close = identity.rfind('>')?;
    if close < open {
        return None;
    }
    let name = identity[..open].trim();
    let email = identity[open + 1..close].trim();
    if name.is_empty() {
        return None;
    }
    Some((
        user.to_string(),
        AuthorEntry {
            name: name.to_string(),
            email: email.to_string(),
        },
    ))
}
