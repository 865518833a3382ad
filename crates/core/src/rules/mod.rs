//! Path routing rules.
//!
//! A rules file declares output repositories and an ordered list of `match`
//! rules. Each changed Subversion path is tested against the rules in
//! declaration order; the first qualifying rule decides whether the path is
//! ignored, recursed into, or exported to a repository and branch.

pub mod matcher;
pub mod parser;
pub mod stats;

use std::fmt;

use regex_lite::{Captures, Regex};

use crate::Revnum;

pub use matcher::{apply_substitutions, find_match, split_path, MatchMask, PathSplit};
pub use parser::{load_rule_files, RuleFile};
pub use stats::RuleStats;

/// What to do with a path matched by a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuleAction {
    /// Drop the path.
    #[default]
    Ignore,
    /// Descend into the directory without exporting the node itself.
    Recurse,
    /// Export into the rule's repository and branch.
    Export,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Ignore => write!(f, "ignore"),
            RuleAction::Recurse => write!(f, "recurse"),
            RuleAction::Export => write!(f, "export"),
        }
    }
}

/// One `s/pattern/replacement/` rewrite applied to a repository or branch name.
#[derive(Debug, Clone)]
pub struct Substitution {
    pattern: Regex,
    replacement: String,
}

impl Substitution {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: convert_template(replacement),
        })
    }

    /// Replace every match of the pattern in `input`.
    pub fn apply(&self, input: &str) -> String {
        self.pattern
            .replace_all(input, self.replacement.as_str())
            .into_owned()
    }
}

/// A `match` block. Identity is the file and line it was declared on.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub file: String,
    pub line: usize,
    /// The pattern as written in the rules file.
    pub pattern: String,
    anchored: Regex,
    pub min_revision: Revnum,
    pub max_revision: Option<Revnum>,
    pub action: RuleAction,
    pub repository: String,
    pub branch: String,
    pub prefix: String,
    pub repository_substitutions: Vec<Substitution>,
    pub branch_substitutions: Vec<Substitution>,
    pub annotate: bool,
}

impl MatchRule {
    /// Build a rule with default settings (ignore, any revision).
    pub fn new(
        file: impl Into<String>,
        line: usize,
        pattern: &str,
    ) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            file: file.into(),
            line,
            pattern: pattern.to_string(),
            anchored: Regex::new(&format!("^(?:{pattern})"))?,
            min_revision: 0,
            max_revision: None,
            action: RuleAction::Ignore,
            repository: String::new(),
            branch: String::new(),
            prefix: String::new(),
            repository_substitutions: Vec::new(),
            branch_substitutions: Vec::new(),
            annotate: false,
        })
    }

    /// `file:line pattern`, used in diagnostics and statistics.
    pub fn info(&self) -> String {
        format!("{}:{} {}", self.file, self.line, self.pattern)
    }

    /// Whether the rule applies to `revision`.
    pub fn covers(&self, revision: Revnum) -> bool {
        self.min_revision <= revision && self.max_revision.map_or(true, |max| revision <= max)
    }

    /// Length of the match at offset 0 of `path`, if any.
    pub fn matched_len(&self, path: &str) -> Option<usize> {
        self.anchored.find(path).map(|m| m.end())
    }

    pub(crate) fn captures<'p>(&self, path: &'p str) -> Option<Captures<'p>> {
        self.anchored.captures(path)
    }

    /// Whether any template refers to a capture group.
    pub fn repository_is_templated(&self) -> bool {
        self.repository.contains('\\') || self.repository.contains('$')
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info())
    }
}

/// A `create repository` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryDecl {
    pub name: String,
    pub file: String,
    pub line: usize,
    pub branches: Vec<String>,
    pub description: String,
    /// Non-empty for a forwarding repository.
    pub forward_to: String,
    /// Path prefix a forwarding repository prepends.
    pub prefix: String,
}

impl RepositoryDecl {
    pub fn is_forwarding(&self) -> bool {
        !self.forward_to.is_empty()
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }
}

/// Rewrite `\N` and `$N` capture references into the braced `${N}` form, so
/// a reference followed by a word character still names the numbered group.
pub(crate) fn convert_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek().copied()) {
            ('\\' | '$', Some(d)) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                out.push_str("${");
                out.push_str(&digits);
                out.push('}');
            }
            ('\\', Some('\\')) => {
                out.push('\\');
                chars.next();
            }
            ('$', Some('$')) => {
                out.push_str("$$");
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_template() {
        assert_eq!(convert_template("\\1"), "${1}");
        assert_eq!(convert_template("kde-\\1-\\12x"), "kde-${1}-${12}x");
        assert_eq!(convert_template("$1"), "${1}");
        assert_eq!(convert_template("$1_x"), "${1}_x");
        assert_eq!(convert_template("${2}"), "${2}");
        assert_eq!(convert_template("$name $$1"), "$name $$1");
        assert_eq!(convert_template("plain"), "plain");
        assert_eq!(convert_template("a\\\\b"), "a\\b");
    }

    #[test]
    fn test_substitution_capture_before_word_character() {
        let subst = Substitution::new("^(\\w+)-branch$", "$1_x").unwrap();
        assert_eq!(subst.apply("kde4-branch"), "kde4_x");
    }

    #[test]
    fn test_substitution_replaces_all() {
        let subst = Substitution::new("_", "-").unwrap();
        assert_eq!(subst.apply("KDE_4_0_BRANCH"), "KDE-4-0-BRANCH");
    }

    #[test]
    fn test_substitution_with_capture() {
        let subst = Substitution::new("trunk/(.*)", "$1").unwrap();
        assert_eq!(subst.apply("trunk/foo/bar.txt"), "foo/bar.txt");
    }

    #[test]
    fn test_rule_revision_bounds() {
        let mut rule = MatchRule::new("a.rules", 1, "/trunk/").unwrap();
        assert!(rule.covers(1));
        rule.min_revision = 10;
        rule.max_revision = Some(20);
        assert!(!rule.covers(9));
        assert!(rule.covers(10));
        assert!(rule.covers(20));
        assert!(!rule.covers(21));
    }

    #[test]
    fn test_match_is_anchored() {
        let rule = MatchRule::new("a.rules", 1, "/trunk/").unwrap();
        assert_eq!(rule.matched_len("/trunk/src/main.c"), Some(7));
        assert_eq!(rule.matched_len("/branches/x/trunk/"), None);
    }

    #[test]
    fn test_repository_templating() {
        let mut rule = MatchRule::new("a.rules", 1, "/([^/]+)/trunk/").unwrap();
        rule.repository = "\\1".into();
        assert!(rule.repository_is_templated());
        rule.repository = "kdelibs".into();
        assert!(!rule.repository_is_templated());
    }
}
