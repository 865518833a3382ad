//! Mark allocation.
//!
//! Commit marks count up from 1 for the whole run. File marks count down
//! from a sentinel and start over once no transaction of the repository is
//! open, so blob marks stay out of the way of commit marks.

/// First file mark handed out.
pub const FILE_MARK_SENTINEL: u64 = u64::MAX - 1;

/// The single mark reused by every commit on the notes ref.
pub const NOTES_MARK: u64 = FILE_MARK_SENTINEL + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkAllocator {
    last_commit: u64,
    next_file: u64,
    sentinel: u64,
}

impl Default for MarkAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkAllocator {
    pub fn new() -> Self {
        Self::with_sentinel(FILE_MARK_SENTINEL)
    }

    /// Allocator whose file marks start at `sentinel`.
    pub fn with_sentinel(sentinel: u64) -> Self {
        Self {
            last_commit: 0,
            next_file: sentinel,
            sentinel,
        }
    }

    pub fn sentinel(&self) -> u64 {
        self.sentinel
    }

    pub fn last_commit_mark(&self) -> u64 {
        self.last_commit
    }

    /// Continue commit numbering after `mark`, as recovered on resume.
    pub fn restore_commit_mark(&mut self, mark: u64) {
        self.last_commit = mark;
    }

    /// How many more commit marks can be handed out before they would run
    /// into the file marks.
    pub fn available_commit_marks(&self) -> u64 {
        self.next_file
            .saturating_sub(1)
            .saturating_sub(self.last_commit + 1)
    }

    /// Next commit mark, or `None` if it would run into the file marks.
    pub fn next_commit_mark(&mut self) -> Option<u64> {
        let mark = self.last_commit + 1;
        if mark >= self.next_file.saturating_sub(1) {
            return None;
        }
        self.last_commit = mark;
        Some(mark)
    }

    /// Next file mark, or `None` if it would run into the commit marks.
    pub fn next_file_mark(&mut self) -> Option<u64> {
        let mark = self.next_file;
        if mark <= self.last_commit + 1 {
            return None;
        }
        self.next_file -= 1;
        Some(mark)
    }

    pub fn reset_file_marks(&mut self) {
        self.next_file = self.sentinel;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_marks_ascend_from_one() {
        let mut marks = MarkAllocator::new();
        assert_eq!(marks.next_commit_mark(), Some(1));
        assert_eq!(marks.next_commit_mark(), Some(2));
        assert_eq!(marks.last_commit_mark(), 2);
    }

    #[test]
    fn test_file_marks_descend_and_reset() {
        let mut marks = MarkAllocator::new();
        assert_eq!(marks.next_file_mark(), Some(FILE_MARK_SENTINEL));
        assert_eq!(marks.next_file_mark(), Some(FILE_MARK_SENTINEL - 1));
        marks.reset_file_marks();
        assert_eq!(marks.next_file_mark(), Some(FILE_MARK_SENTINEL));
        assert!(NOTES_MARK > FILE_MARK_SENTINEL);
    }

    #[test]
    fn test_ranges_never_meet() {
        let mut marks = MarkAllocator::with_sentinel(6);
        assert_eq!(marks.next_commit_mark(), Some(1));
        assert_eq!(marks.next_commit_mark(), Some(2));
        assert_eq!(marks.next_file_mark(), Some(6));
        assert_eq!(marks.next_file_mark(), Some(5));
        assert_eq!(marks.next_file_mark(), Some(4));
        // 3 would be adjacent to the last commit mark
        assert_eq!(marks.next_file_mark(), None);
        // 3 would be adjacent to the next file mark
        assert_eq!(marks.available_commit_marks(), 0);
        assert_eq!(marks.next_commit_mark(), None);

        marks.reset_file_marks();
        assert_eq!(marks.available_commit_marks(), 2);
        assert_eq!(marks.next_commit_mark(), Some(3));
        assert_eq!(marks.next_commit_mark(), Some(4));
        assert_eq!(marks.next_commit_mark(), None);
    }

    #[test]
    fn test_restore_commit_mark() {
        let mut marks = MarkAllocator::new();
        marks.restore_commit_mark(41);
        assert_eq!(marks.next_commit_mark(), Some(42));
    }
}
