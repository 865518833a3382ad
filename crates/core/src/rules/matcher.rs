//! First-match rule evaluation and path splitting.

use tracing::trace;

use super::{convert_template, MatchRule, RuleAction, Substitution};
use crate::Revnum;

/// Actions excluded from a lookup.
///
/// Looking up the rule that exported the *source* of a copy must skip rules
/// that ignore or merely recurse, since those never produced a branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchMask {
    pub no_ignore: bool,
    pub no_recurse: bool,
}

impl MatchMask {
    pub const NONE: MatchMask = MatchMask {
        no_ignore: false,
        no_recurse: false,
    };
    pub const NO_IGNORE: MatchMask = MatchMask {
        no_ignore: true,
        no_recurse: false,
    };

    fn excludes(&self, action: RuleAction) -> bool {
        match action {
            RuleAction::Ignore => self.no_ignore,
            RuleAction::Recurse => self.no_recurse,
            RuleAction::Export => false,
        }
    }
}

/// Return the first rule of `rules` that covers `revision`, is not excluded
/// by `mask`, and whose pattern matches `path` at offset 0.
pub fn find_match<'r>(
    rules: &'r [MatchRule],
    revision: Revnum,
    path: &str,
    mask: MatchMask,
) -> Option<&'r MatchRule> {
    let found = rules.iter().find(|rule| {
        rule.covers(revision) && !mask.excludes(rule.action) && rule.matched_len(path).is_some()
    });
    if let Some(rule) = found {
        trace!(path, revision, rule = %rule, "rule matched");
    }
    found
}

/// Apply each substitution to the result of the previous one.
pub fn apply_substitutions(substitutions: &[Substitution], input: &str) -> String {
    substitutions
        .iter()
        .fold(input.to_string(), |acc, subst| subst.apply(&acc))
}

/// Where a matched path lands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSplit {
    /// The part of the Subversion path the rule matched.
    pub svnprefix: String,
    pub repository: String,
    pub branch: String,
    /// Path inside the branch: the expanded prefix plus the unmatched tail.
    pub path: String,
}

/// Split `path` according to `rule`. Returns `None` if the rule does not match.
pub fn split_path(rule: &MatchRule, path: &str) -> Option<PathSplit> {
    let caps = rule.captures(path)?;
    let end = caps.get(0)?.end();

    let expand = |template: &str| {
        let mut out = String::new();
        caps.expand(&convert_template(template), &mut out);
        out
    };

    let repository = apply_substitutions(&rule.repository_substitutions, &expand(&rule.repository));
    let branch = apply_substitutions(&rule.branch_substitutions, &expand(&rule.branch));
    let mut inner = expand(&rule.prefix);
    inner.push_str(&path[end..]);

    Some(PathSplit {
        svnprefix: path[..end].to_string(),
        repository,
        branch,
        path: inner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(line: usize, pattern: &str, action: RuleAction) -> MatchRule {
        let mut rule = MatchRule::new("test.rules", line, pattern).unwrap();
        rule.action = action;
        rule
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            rule(1, "/trunk/doc/", RuleAction::Ignore),
            rule(2, "/trunk/", RuleAction::Export),
        ];
        let found = find_match(&rules, 5, "/trunk/doc/index.html", MatchMask::NONE).unwrap();
        assert_eq!(found.line, 1);
        let found = find_match(&rules, 5, "/trunk/src/main.c", MatchMask::NONE).unwrap();
        assert_eq!(found.line, 2);
    }

    #[test]
    fn test_no_match() {
        let rules = vec![rule(1, "/trunk/", RuleAction::Export)];
        assert!(find_match(&rules, 5, "/branches/foo/", MatchMask::NONE).is_none());
        assert!(find_match(&rules, 5, "/x/trunk/", MatchMask::NONE).is_none());
    }

    #[test]
    fn test_revision_bounds_skip_rule() {
        let mut early = rule(1, "/trunk/", RuleAction::Export);
        early.max_revision = Some(99);
        early.branch = "old".into();
        let mut late = rule(2, "/trunk/", RuleAction::Export);
        late.min_revision = 100;
        late.branch = "new".into();
        let rules = vec![early, late];

        assert_eq!(find_match(&rules, 99, "/trunk/", MatchMask::NONE).unwrap().branch, "old");
        assert_eq!(find_match(&rules, 100, "/trunk/", MatchMask::NONE).unwrap().branch, "new");
    }

    #[test]
    fn test_mask_skips_ignore_rules() {
        let rules = vec![
            rule(1, "/tags/", RuleAction::Ignore),
            rule(2, "/tags/", RuleAction::Export),
        ];
        assert_eq!(find_match(&rules, 1, "/tags/v1/", MatchMask::NONE).unwrap().line, 1);
        assert_eq!(find_match(&rules, 1, "/tags/v1/", MatchMask::NO_IGNORE).unwrap().line, 2);
    }

    #[test]
    fn test_substitutions_apply_in_order() {
        let substs = vec![
            Substitution::new("a", "b").unwrap(),
            Substitution::new("b", "c").unwrap(),
        ];
        assert_eq!(apply_substitutions(&substs, "a"), "c");

        let reversed = vec![
            Substitution::new("b", "c").unwrap(),
            Substitution::new("a", "b").unwrap(),
        ];
        assert_eq!(apply_substitutions(&reversed, "a"), "b");
    }

    #[test]
    fn test_split_path_expands_templates() {
        let mut r = rule(1, "/([^/]+)/branches/([^/]+)/", RuleAction::Export);
        r.repository = "\\1".into();
        r.branch = "$2".into();
        r.prefix = "src/".into();
        r.branch_substitutions = vec![Substitution::new("_", ".").unwrap()];

        let split = split_path(&r, "/kdelibs/branches/KDE_4_0/kio/job.cpp").unwrap();
        assert_eq!(split.svnprefix, "/kdelibs/branches/KDE_4_0/");
        assert_eq!(split.repository, "kdelibs");
        assert_eq!(split.branch, "KDE.4.0");
        assert_eq!(split.path, "src/kio/job.cpp");
    }

    #[test]
    fn test_split_path_branch_root() {
        let mut r = rule(1, "/trunk/", RuleAction::Export);
        r.repository = "lib".into();
        r.branch = "main".into();
        let split = split_path(&r, "/trunk/").unwrap();
        assert_eq!(split.svnprefix, "/trunk/");
        assert!(split.path.is_empty());
        assert!(split_path(&r, "/tags/").is_none());
    }
}
