//! Translation of Subversion usernames into git committer identities.
//!
//! Lookup order:
//! 1. Explicit mapping file entry
//! 2. Empty author: `nobody <nobody@localhost>`
//! 3. Fallback: `user <user@domain>`

pub mod mapping_file;

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::errors::IdentityError;

pub use mapping_file::{AuthorEntry, MappingFile};

/// Maps Subversion usernames to `Name <email>` committer strings.
#[derive(Debug, Clone)]
pub struct IdentityMap {
    entries: HashMap<String, AuthorEntry>,
    domain: String,
}

impl IdentityMap {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            entries: HashMap::new(),
            domain: domain.into(),
        }
    }

    /// Build a map from a mapping file, or an empty one when `path` is `None`.
    pub fn load(path: Option<&Path>, domain: &str) -> Result<Self, IdentityError> {
        let mut map = Self::new(domain);
        if let Some(path) = path {
            map.entries = MappingFile::load(path)?;
        }
        Ok(map)
    }

    pub fn insert(&mut self, user: impl Into<String>, entry: AuthorEntry) {
        self.entries.insert(user.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The committer identity for `author`.
    pub fn committer(&self, author: Option<&str>) -> String {
        let author = author.unwrap_or("").trim();
        if let Some(entry) = self.entries.get(author) {
            return format!("{} <{}>", entry.name, entry.email);
        }
        if author.is_empty() {
            return "nobody <nobody@localhost>".to_string();
        }
        debug!(author, domain = %self.domain, "author not in identity map");
        format!("{author} <{author}@{}>", self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committer_lookup_order() {
        let mut map = IdentityMap::new("kde.org");
        map.insert(
            "jdoe",
            AuthorEntry {
                name: "John Doe".into(),
                email: "john@example.com".into(),
            },
        );

        assert_eq!(map.committer(Some("jdoe")), "John Doe <john@example.com>");
        assert_eq!(map.committer(Some("alice")), "alice <alice@kde.org>");
        assert_eq!(map.committer(None), "nobody <nobody@localhost>");
        assert_eq!(map.committer(Some("")), "nobody <nobody@localhost>");
    }

    #[test]
    fn test_load_without_file() {
        let map = IdentityMap::load(None, "localhost").unwrap();
        assert!(map.is_empty());
    }
}
