//! Rules file parser.
//!
//! ```text
//! # comment
//! declare KDE=kde-svn
//!
//! create repository kdelibs
//!     description KDE core libraries
//! end repository
//!
//! create repository kdelibs-doc
//!     repository kdelibs
//!     prefix doc/
//! end repository
//!
//! match /trunk/KDE/kdelibs/
//!     repository kdelibs
//!     branch master
//! end match
//!
//! match /branches/KDE/([^/]+)/kdelibs/
//!     repository kdelibs
//!     branch \1
//!     substitute branch s/_/./
//!     min revision 500
//! end match
//!
//! include ${KDE|kde}-tags.rules
//! ```
//!
//! Keywords are case-insensitive. `${NAME}` expands a previous `declare`,
//! `${NAME|default}` falls back to `default`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{MatchRule, RepositoryDecl, RuleAction, Substitution};
use crate::errors::RuleError;

/// Includes nested deeper than this are assumed to be cyclic.
const MAX_INCLUDE_DEPTH: usize = 32;

/// The contents of one top-level rules file, includes flattened.
#[derive(Debug, Clone, Default)]
pub struct RuleFile {
    pub path: PathBuf,
    pub repositories: Vec<RepositoryDecl>,
    pub rules: Vec<MatchRule>,
}

impl RuleFile {
    /// Load and parse a rules file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading rules file");
        let mut parser = Parser::default();
        parser.load(path, 0)?;
        debug!(
            repositories = parser.repositories.len(),
            rules = parser.rules.len(),
            "rules file parsed"
        );
        Ok(Self {
            path: path.to_path_buf(),
            repositories: parser.repositories,
            rules: parser.rules,
        })
    }

    /// Parse rules from a string. `include` lines resolve relative to the
    /// current directory.
    pub fn parse_str(name: &str, text: &str) -> Result<Self, RuleError> {
        let mut parser = Parser::default();
        parser.parse(name, Path::new(""), text, 0)?;
        Ok(Self {
            path: PathBuf::from(name),
            repositories: parser.repositories,
            rules: parser.rules,
        })
    }
}

/// Load several rules files; each one stays an independent rule list.
pub fn load_rule_files(paths: &[PathBuf]) -> Result<Vec<RuleFile>, RuleError> {
    paths.iter().map(RuleFile::load).collect()
}

// ---------------------------------------------------------------------------
// Parser state
// ---------------------------------------------------------------------------

enum Block {
    None,
    Repository(RepositoryDecl),
    Match { rule: MatchRule, explicit_action: bool },
}

#[derive(Default)]
struct Parser {
    variables: HashMap<String, String>,
    repositories: Vec<RepositoryDecl>,
    rules: Vec<MatchRule>,
}

struct Location<'a> {
    file: &'a str,
    line: usize,
}

impl Location<'_> {
    fn malformed(&self, detail: impl Into<String>) -> RuleError {
        RuleError::Malformed {
            file: self.file.to_string(),
            line: self.line,
            detail: detail.into(),
        }
    }
}

impl Parser {
    fn load(&mut self, path: &Path, depth: usize) -> Result<(), RuleError> {
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        self.parse(&path.display().to_string(), dir, &text, depth)
    }

    fn parse(&mut self, file: &str, dir: &Path, text: &str, depth: usize) -> Result<(), RuleError> {
        let mut block = Block::None;
        let mut last_line = 0;

        for (index, raw) in text.lines().enumerate() {
            let loc = Location { file, line: index + 1 };
            last_line = loc.line;

            let line = match raw.find('#') {
                Some(hash) => &raw[..hash],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let (keyword, rest) = split_keyword(line);
            if keyword.eq_ignore_ascii_case("include") {
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(loc.malformed("includes nested too deeply"));
                }
                let target = self.expand_variables(rest, &loc)?;
                self.load(&dir.join(target), depth + 1)?;
                continue;
            }

            let line = self.expand_variables(line, &loc)?;
            let (keyword, rest) = split_keyword(&line);
            let keyword = keyword.to_ascii_lowercase();

            if keyword == "declare" {
                self.declare(rest, &loc)?;
                continue;
            }

            block = match block {
                Block::None => self.start_block(&keyword, rest, &loc)?,
                Block::Repository(repo) => self.repository_line(repo, &keyword, rest, &loc)?,
                Block::Match {
                    rule,
                    explicit_action,
                } => self.match_line(rule, explicit_action, &keyword, rest, &loc)?,
            };
        }

        match block {
            Block::None => Ok(()),
            Block::Repository(repo) => Err(Location { file, line: last_line }
                .malformed(format!("repository '{}' is missing 'end repository'", repo.name))),
            Block::Match { rule, .. } => Err(Location { file, line: last_line }
                .malformed(format!("match '{}' is missing 'end match'", rule.pattern))),
        }
    }

    fn declare(&mut self, rest: &str, loc: &Location<'_>) -> Result<(), RuleError> {
        let (name, value) = rest
            .split_once('=')
            .ok_or_else(|| loc.malformed("declare expects NAME=value"))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(loc.malformed(format!("invalid variable name '{name}'")));
        }
        if value.is_empty() || value.contains(char::is_whitespace) {
            return Err(loc.malformed(format!("invalid value for '{name}'")));
        }
        debug!(name, value, "declared rules variable");
        self.variables.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn expand_variables(&self, line: &str, loc: &Location<'_>) -> Result<String, RuleError> {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;
        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            out.push_str(&rest[..start]);
            let body = &rest[start + 2..start + len];
            let (name, default) = match body.split_once('|') {
                Some((name, default)) => (name, Some(default)),
                None => (body, None),
            };
            match (self.variables.get(name), default) {
                (Some(value), _) => out.push_str(value),
                (None, Some(default)) => out.push_str(default),
                (None, None) => {
                    return Err(RuleError::UndeclaredVariable {
                        file: loc.file.to_string(),
                        line: loc.line,
                        name: name.to_string(),
                    })
                }
            }
            rest = &rest[start + len + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn start_block(&mut self, keyword: &str, rest: &str, loc: &Location<'_>) -> Result<Block, RuleError> {
        match keyword {
            "create" => {
                let (what, name) = split_keyword(rest);
                if !what.eq_ignore_ascii_case("repository") || !is_single_word(name) {
                    return Err(loc.malformed("expected 'create repository <name>'"));
                }
                Ok(Block::Repository(RepositoryDecl {
                    name: name.to_string(),
                    file: loc.file.to_string(),
                    line: loc.line,
                    ..RepositoryDecl::default()
                }))
            }
            "match" => {
                if rest.is_empty() {
                    return Err(loc.malformed("match without a pattern"));
                }
                let rule = MatchRule::new(loc.file, loc.line, rest).map_err(|e| {
                    RuleError::InvalidPattern {
                        file: loc.file.to_string(),
                        line: loc.line,
                        pattern: rest.to_string(),
                        detail: e.to_string(),
                    }
                })?;
                Ok(Block::Match {
                    rule,
                    explicit_action: false,
                })
            }
            _ => Err(loc.malformed(format!("unexpected '{keyword}' outside of a block"))),
        }
    }

    fn repository_line(
        &mut self,
        mut repo: RepositoryDecl,
        keyword: &str,
        rest: &str,
        loc: &Location<'_>,
    ) -> Result<Block, RuleError> {
        match keyword {
            "branch" if is_single_word(rest) => repo.branches.push(rest.to_string()),
            "description" if !rest.is_empty() => repo.description = rest.to_string(),
            "repository" if is_single_word(rest) => repo.forward_to = rest.to_string(),
            "prefix" => repo.prefix = rest.to_string(),
            "end" if rest.eq_ignore_ascii_case("repository") => {
                if repo.is_forwarding() && (!repo.description.is_empty() || !repo.branches.is_empty()) {
                    return Err(RuleError::ContradictoryRepository {
                        location: repo.location(),
                        target: repo.forward_to,
                        name: repo.name,
                    });
                }
                debug!(name = %repo.name, forward_to = %repo.forward_to, "declared repository");
                self.repositories.push(repo);
                return Ok(Block::None);
            }
            _ => return Err(loc.malformed(format!("unexpected '{keyword}' in repository block"))),
        }
        Ok(Block::Repository(repo))
    }

    fn match_line(
        &mut self,
        mut rule: MatchRule,
        mut explicit_action: bool,
        keyword: &str,
        rest: &str,
        loc: &Location<'_>,
    ) -> Result<Block, RuleError> {
        match keyword {
            "repository" if is_single_word(rest) => rule.repository = rest.to_string(),
            "branch" if is_single_word(rest) => rule.branch = rest.to_string(),
            "prefix" => rule.prefix = rest.trim_start_matches('/').to_string(),
            "annotated" if is_single_word(rest) => {
                rule.annotate = rest.eq_ignore_ascii_case("true");
            }
            "action" => {
                rule.action = match rest.to_ascii_lowercase().as_str() {
                    "export" => RuleAction::Export,
                    "ignore" => RuleAction::Ignore,
                    "recurse" => RuleAction::Recurse,
                    other => return Err(loc.malformed(format!("invalid action '{other}'"))),
                };
                explicit_action = true;
            }
            "min" | "max" => {
                let (what, number) = split_keyword(rest);
                let revision = match (what.eq_ignore_ascii_case("revision"), number.parse()) {
                    (true, Ok(revision)) => revision,
                    _ => return Err(loc.malformed(format!("expected '{keyword} revision <number>'"))),
                };
                if keyword == "min" {
                    rule.min_revision = revision;
                } else {
                    rule.max_revision = Some(revision);
                }
            }
            "substitute" => {
                let (what, text) = split_keyword(rest);
                let subst = parse_substitution(text, loc)?;
                match what.to_ascii_lowercase().as_str() {
                    "repository" => rule.repository_substitutions.push(subst),
                    "branch" => rule.branch_substitutions.push(subst),
                    _ => return Err(loc.malformed("substitute applies to 'repository' or 'branch'")),
                }
            }
            "end" if rest.eq_ignore_ascii_case("match") => {
                if !explicit_action && !rule.repository.is_empty() {
                    rule.action = RuleAction::Export;
                }
                if rule.action == RuleAction::Export && rule.branch.is_empty() {
                    rule.branch = "master".into();
                }
                self.rules.push(rule);
                return Ok(Block::None);
            }
            _ => return Err(loc.malformed(format!("unexpected '{keyword}' in match block"))),
        }
        Ok(Block::Match {
            rule,
            explicit_action,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    }
}

fn is_single_word(text: &str) -> bool {
    !text.is_empty() && !text.contains(char::is_whitespace)
}

/// Parse `s<sep>pattern<sep>replacement<sep>`. The separator may appear
/// escaped inside the pattern.
fn parse_substitution(text: &str, loc: &Location<'_>) -> Result<Substitution, RuleError> {
    let invalid = || RuleError::InvalidSubstitution {
        file: loc.file.to_string(),
        line: loc.line,
        text: text.to_string(),
    };

    let mut chars = text.chars();
    if chars.next() != Some('s') {
        return Err(invalid());
    }
    let sep = chars.next().ok_or_else(invalid)?;
    let body = &text[1 + sep.len_utf8()..];
    let body = body.strip_suffix(sep).ok_or_else(invalid)?;

    let mut pattern = String::new();
    let mut escaped = false;
    let mut split_at = None;
    for (i, c) in body.char_indices() {
        if escaped {
            if c != sep {
                pattern.push('\\');
            }
            pattern.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            split_at = Some(i);
            break;
        } else {
            pattern.push(c);
        }
    }
    let split_at = split_at.ok_or_else(invalid)?;
    let replacement = &body[split_at + sep.len_utf8()..];

    Substitution::new(&pattern, replacement).map_err(|e| RuleError::InvalidPattern {
        file: loc.file.to_string(),
        line: loc.line,
        pattern,
        detail: e.to_string(),
    })
}
