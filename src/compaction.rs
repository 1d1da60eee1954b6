//! Compaction input description and planner helpers.
//!
//! A compaction merges the picked files of level L (`inputs[0]`) with the
//! overlapping files of level L+1 (`inputs[1]`) into fresh L+1 files.
//! Files of L+2 overlapping the union range (the "grandparents") bound
//! how wide a single output file may become, so future compactions of
//! L+1 stay cheap.

use crate::value::InternalKey;
use crate::version::edit::VersionEdit;
use crate::version::{FileMetadata, Version, NUM_LEVELS};
use std::sync::Arc;

/// A planned compaction: source level, inputs, grandparents and the edit
/// being accumulated
pub struct Compaction {
    /// Source level L; outputs land at L+1
    pub level: usize,

    /// `inputs[0]`: files from L; `inputs[1]`: overlapping files from L+1
    pub inputs: [Vec<Arc<FileMetadata>>; 2],

    /// Files from L+2 overlapping the union input range
    pub grandparents: Vec<Arc<FileMetadata>>,

    /// Version the inputs were picked from, pinned for the whole run
    pub input_version: Arc<Version>,

    /// Output files may grow to this many bytes
    pub max_output_file_size: u64,

    /// The version edit the compaction accumulates
    pub edit: VersionEdit,

    // State for is_base_level_for_key
    level_ptrs: [usize; NUM_LEVELS],

    // State for should_stop_before
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,
}

impl Compaction {
    pub(crate) fn new(level: usize, max_output_file_size: u64, input_version: Arc<Version>) -> Self {
        Self {
            level,
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            input_version,
            max_output_file_size,
            edit: VersionEdit::default(),
            level_ptrs: [0; NUM_LEVELS],
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
        }
    }

    /// Bytes of grandparent overlap after which an output file is sealed
    #[must_use]
    pub fn max_grandparent_overlap_bytes(&self) -> u64 {
        10 * self.max_output_file_size
    }

    /// True iff the compaction can be served by re-assigning a single
    /// file to the next level without rewriting it.
    ///
    /// A move is avoided when a lot of grandparent data overlaps;
    /// otherwise the moved file would make the next compaction of L+1
    /// very expensive.
    #[must_use]
    pub fn is_trivial_move(&self) -> bool {
        self.inputs[0].len() == 1
            && self.inputs[1].is_empty()
            && Version::total_file_size(&self.grandparents) <= self.max_grandparent_overlap_bytes()
    }

    /// Records the deletion of every input file in the edit
    pub fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for file in &self.inputs[which] {
                self.edit.delete_file(self.level + which, file.number);
            }
        }
    }

    /// Returns `false` iff some file in a level deeper than the output
    /// level contains `user_key` in its range.
    ///
    /// Monotone in `user_key`: the per-level pointers only ever advance,
    /// so a compaction scanning keys in order never rescans a level.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        for level in (self.level + 2)..NUM_LEVELS {
            let files = &self.input_version.files[level];

            while let Some(file) = files.get(self.level_ptrs[level]) {
                if *user_key <= *file.largest.user_key {
                    if *user_key >= *file.smallest.user_key {
                        return false;
                    }
                    break;
                }

                self.level_ptrs[level] += 1;
            }
        }

        true
    }

    /// Returns `true` when the output file being built should be sealed
    /// before `internal_key` is added, because it would overlap too much
    /// grandparent data.
    pub fn should_stop_before(&mut self, internal_key: &InternalKey) -> bool {
        while let Some(grandparent) = self.grandparents.get(self.grandparent_index) {
            if *internal_key <= grandparent.largest {
                break;
            }

            if self.seen_key {
                self.overlapped_bytes += grandparent.file_size;
            }
            self.grandparent_index += 1;
        }

        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap_bytes() {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;
    use test_log::test;

    const FILE_SIZE: u64 = 2 * 1_024 * 1_024;

    fn meta(number: u64, smallest: &[u8], largest: &[u8], file_size: u64) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            number,
            file_size,
            InternalKey::new(smallest, 5, ValueType::Value),
            InternalKey::new(largest, 1, ValueType::Value),
        ))
    }

    fn ikey(user_key: &[u8]) -> InternalKey {
        InternalKey::new(user_key, 5, ValueType::Value)
    }

    #[test]
    fn trivial_move() {
        let version = Arc::new(Version::default());

        let mut c = Compaction::new(1, FILE_SIZE, Arc::clone(&version));
        c.inputs[0].push(meta(1, b"a", b"c", 1_000));
        assert!(c.is_trivial_move());

        // Two inputs: not trivial
        c.inputs[0].push(meta(2, b"d", b"e", 1_000));
        assert!(!c.is_trivial_move());

        // Overlap with the next level: not trivial
        let mut c = Compaction::new(1, FILE_SIZE, Arc::clone(&version));
        c.inputs[0].push(meta(1, b"a", b"c", 1_000));
        c.inputs[1].push(meta(3, b"b", b"d", 1_000));
        assert!(!c.is_trivial_move());

        // Heavy grandparent overlap: not trivial
        let mut c = Compaction::new(1, FILE_SIZE, version);
        c.inputs[0].push(meta(1, b"a", b"c", 1_000));
        for i in 0..11 {
            c.grandparents.push(meta(10 + i, b"a", b"b", FILE_SIZE));
        }
        assert!(!c.is_trivial_move());
    }

    #[test]
    fn base_level_check() {
        let mut version = Version::default();
        version.files[3] = vec![meta(7, b"d", b"f", 1_000)];

        let mut c = Compaction::new(1, FILE_SIZE, Arc::new(version));

        assert!(c.is_base_level_for_key(b"a"));
        assert!(!c.is_base_level_for_key(b"d"));
        assert!(!c.is_base_level_for_key(b"e"));
        assert!(c.is_base_level_for_key(b"g"));
        assert!(c.is_base_level_for_key(b"z"));
    }

    #[test]
    fn stop_before_limits_grandparent_overlap() {
        let version = Arc::new(Version::default());
        let mut c = Compaction::new(1, FILE_SIZE, version);

        // 25 grandparent files of 2 MiB each; the budget is 20 MiB
        for i in 0..25u64 {
            let smallest = format!("k{:02}a", i);
            let largest = format!("k{:02}z", i);
            c.grandparents
                .push(meta(100 + i, smallest.as_bytes(), largest.as_bytes(), FILE_SIZE));
        }

        let mut stops = 0;
        for i in 0..25u64 {
            let key = format!("k{:02}b", i);
            if c.should_stop_before(&ikey(key.as_bytes())) {
                stops += 1;
            }
        }

        assert!(stops >= 1, "output files must be split");

        // The accumulator resets after each stop
        assert!(stops <= 3);
    }

    #[test]
    fn add_input_deletions() {
        let version = Arc::new(Version::default());
        let mut c = Compaction::new(2, FILE_SIZE, version);

        c.inputs[0].push(meta(11, b"a", b"c", 1_000));
        c.inputs[1].push(meta(12, b"b", b"d", 1_000));
        c.add_input_deletions();

        assert!(c.edit.deleted_files.contains(&(2, 11)));
        assert!(c.edit.deleted_files.contains(&(3, 12)));
        assert_eq!(2, c.edit.deleted_files.len());
    }
}
