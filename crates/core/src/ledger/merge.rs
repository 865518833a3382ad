//! Choice of merge parents for a commit.

use std::fmt;

use tracing::{debug, warn};

/// Git refuses octopus merges with more parents than this.
pub const MAX_PARENTS: usize = 16;

/// Decides which inferred merge marks become `merge` lines.
pub trait MergePolicy: fmt::Debug + Send + Sync {
    /// `merges` are the distinct inferred merge marks in discovery order,
    /// `parent` the mark of the first parent (0 for a root commit). The
    /// result never contains `parent`.
    fn select(&self, log: &[u8], parent: u64, merges: &[u64]) -> Vec<u64>;
}

/// Every merge mark except the parent, up to [`MAX_PARENTS`] parents in total.
pub fn all_merges(parent: u64, merges: &[u64]) -> Vec<u64> {
    let mut parents = usize::from(parent != 0);
    let mut selected = Vec::new();
    for &mark in merges {
        if mark == parent {
            debug!(mark, "skipping merge point equal to the parent");
            continue;
        }
        parents += 1;
        if parents > MAX_PARENTS {
            warn!(limit = MAX_PARENTS, "too many merge parents");
            break;
        }
        selected.push(mark);
    }
    selected
}

/// Keeps only the highest merge mark for commits whose log contains one of
/// the configured signatures, and every merge mark otherwise.
///
/// Bulk converters such as cvs2svn produce branch commits that copy from
/// dozens of sources; only the newest of them is a meaningful parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureMergePolicy {
    signatures: Vec<String>,
}

impl SignatureMergePolicy {
    pub fn new(signatures: Vec<String>) -> Self {
        Self { signatures }
    }

    fn matches(&self, log: &[u8]) -> bool {
        self.signatures.iter().any(|sig| {
            !sig.is_empty()
                && log
                    .windows(sig.len())
                    .any(|window| window == sig.as_bytes())
        })
    }
}

impl MergePolicy for SignatureMergePolicy {
    fn select(&self, log: &[u8], parent: u64, merges: &[u64]) -> Vec<u64> {
        if merges.len() > 1 && self.matches(log) {
            let highest = merges.iter().copied().filter(|&m| m != parent).max();
            warn!(
                kept = ?highest,
                discarded = merges.len() - usize::from(highest.is_some()),
                "keeping only the highest merge point of a bulk-converted commit"
            );
            return highest.into_iter().collect();
        }
        all_merges(parent, merges)
    }
}
