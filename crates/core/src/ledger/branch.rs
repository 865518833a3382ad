//! Per-branch revision history.

use crate::Revnum;

/// Result of looking up a branch's mark at a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The branch was never created or has no recorded history.
    Unknown,
    /// The revision lies before every recorded entry.
    Before,
    /// The mark of the newest entry at or before the revision.
    At { mark: u64, revision: Revnum },
}

/// Revision/mark history of one branch.
///
/// `commits` and `marks` are parallel; revisions are strictly increasing. A
/// mark of 0 records a deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Branch {
    /// Revision the branch was (re)created at; 0 if it does not exist.
    pub created: Revnum,
    commits: Vec<Revnum>,
    marks: Vec<u64>,
    /// Accumulated metadata note of the branch tip.
    pub note: Vec<u8>,
}

impl Branch {
    /// A branch that exists from the start of history.
    pub fn declared() -> Self {
        Self {
            created: 1,
            ..Self::default()
        }
    }

    pub fn commits(&self) -> &[Revnum] {
        &self.commits
    }

    pub fn marks(&self) -> &[u64] {
        &self.marks
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Mark of the latest entry, 0 when there is none.
    pub fn last_mark(&self) -> u64 {
        self.marks.last().copied().unwrap_or(0)
    }

    /// Whether the branch currently points at a commit.
    pub fn has_tip(&self) -> bool {
        self.created != 0 && self.last_mark() != 0
    }

    /// Record that `revision` left the branch at `mark`. A second entry for
    /// the same revision replaces the first.
    pub fn record(&mut self, revision: Revnum, mark: u64) {
        if self.commits.last() == Some(&revision) {
            if let Some(last) = self.marks.last_mut() {
                *last = mark;
                return;
            }
        }
        self.commits.push(revision);
        self.marks.push(mark);
    }

    pub fn lookup(&self, revision: Revnum) -> Lookup {
        if self.created == 0 || self.commits.is_empty() {
            return Lookup::Unknown;
        }
        if self.commits.last() == Some(&revision) {
            return Lookup::At {
                mark: self.last_mark(),
                revision,
            };
        }
        let upper = self.commits.partition_point(|&r| r <= revision);
        if upper == 0 {
            return Lookup::Before;
        }
        Lookup::At {
            mark: self.marks[upper - 1],
            revision: self.commits[upper - 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Branch {
        let mut branch = Branch::declared();
        branch.record(5, 10);
        branch.record(9, 11);
        branch.record(20, 12);
        branch
    }

    #[test]
    fn test_lookup_exact_and_closest() {
        let branch = history();
        assert_eq!(branch.lookup(9), Lookup::At { mark: 11, revision: 9 });
        assert_eq!(branch.lookup(15), Lookup::At { mark: 11, revision: 9 });
        assert_eq!(branch.lookup(20), Lookup::At { mark: 12, revision: 20 });
        assert_eq!(branch.lookup(99), Lookup::At { mark: 12, revision: 20 });
    }

    #[test]
    fn test_lookup_before_history() {
        assert_eq!(history().lookup(3), Lookup::Before);
    }

    #[test]
    fn test_lookup_unknown() {
        assert_eq!(Branch::default().lookup(3), Lookup::Unknown);
        assert_eq!(Branch::declared().lookup(3), Lookup::Unknown);
    }

    #[test]
    fn test_record_same_revision_replaces() {
        let mut branch = Branch::declared();
        branch.record(7, 0);
        branch.record(7, 4);
        assert_eq!(branch.commits(), &[7]);
        assert_eq!(branch.marks(), &[4]);
        assert!(branch.has_tip());
    }
}
