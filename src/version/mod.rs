//! Versioned file-set metadata.
//!
//! A version is an immutable per-level snapshot of the live segment
//! files. Readers pin the version they started from by cloning its `Arc`;
//! the version set installs a fresh version after every journaled edit.

pub mod edit;
pub mod set;

use crate::config::ReadOptions;
use crate::table_cache::TableCache;
use crate::value::{InternalKey, SeqNo, UserValue, ValueType};
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex};

/// Number of levels
pub const NUM_LEVELS: usize = 7;

/// Level-0 file count that triggers a compaction
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which writes are delayed by 1ms
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which writes stall
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Metadata of one segment file.
///
/// Shared between all versions that reference the file; the file on disk
/// is collectible once no live version references it.
#[derive(Debug)]
pub struct FileMetadata {
    /// Segment file number
    pub number: u64,

    /// File size in bytes
    pub file_size: u64,

    /// Smallest internal key in the file
    pub smallest: InternalKey,

    /// Largest internal key in the file
    pub largest: InternalKey,

    /// Seeks allowed until the file becomes compaction-pressured
    pub allowed_seeks: AtomicI64,
}

impl FileMetadata {
    pub(crate) fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        // One compaction of ~16 KiB costs about as much as one seek, so a
        // file earns one free seek per 16 KiB before it gets compacted away
        let allowed_seeks = (file_size / 16_384).max(100);

        #[allow(clippy::cast_possible_wrap)]
        Self {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks as i64),
        }
    }

    /// Whether the file's user-key range contains `user_key`
    #[must_use]
    pub fn contains_user_key(&self, user_key: &[u8]) -> bool {
        *self.smallest.user_key <= *user_key && *user_key <= *self.largest.user_key
    }
}

/// Outcome of a point read against a whole version
#[derive(Debug)]
pub(crate) struct VersionRead {
    /// The found value, if the newest visible entry is a value
    pub value: Option<UserValue>,

    /// First file consulted, if more than one file had to be consulted;
    /// the engine charges a seek against it
    pub seek_charge: Option<(usize, Arc<FileMetadata>)>,
}

/// An immutable snapshot of the live file set, per level
pub struct Version {
    /// Per-level file lists; level 0 is ordered newest-first by file
    /// number on read, levels >= 1 are disjoint and sorted by key
    pub files: [Vec<Arc<FileMetadata>>; NUM_LEVELS],

    /// Level with the highest compaction score
    pub(crate) compaction_level: usize,

    /// Score >= 1.0 means the level should be compacted
    pub(crate) compaction_score: f64,

    /// File that exhausted its seek allowance, with its level
    pub(crate) file_to_compact: Mutex<Option<(usize, Arc<FileMetadata>)>>,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            files: Default::default(),
            compaction_level: 0,
            compaction_score: -1.0,
            file_to_compact: Mutex::new(None),
        }
    }
}

impl Version {
    /// Number of files at `level`
    #[must_use]
    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Total byte size of `files`
    pub(crate) fn total_file_size(files: &[Arc<FileMetadata>]) -> u64 {
        files.iter().map(|f| f.file_size).sum()
    }

    /// Index of the first file whose largest key is `>= target`.
    ///
    /// Requires `files` to be disjoint and sorted (levels >= 1).
    pub(crate) fn find_file(files: &[Arc<FileMetadata>], target: &InternalKey) -> usize {
        files.partition_point(|f| f.largest < *target)
    }

    /// All files at `level` whose user-key range overlaps
    /// `[smallest_user_key, largest_user_key]`
    #[must_use]
    pub fn overlapping_files(
        &self,
        level: usize,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> Vec<Arc<FileMetadata>> {
        self.files[level]
            .iter()
            .filter(|f| {
                *f.largest.user_key >= *smallest_user_key
                    && *f.smallest.user_key <= *largest_user_key
            })
            .cloned()
            .collect()
    }

    /// Point lookup across the version, newest level first.
    ///
    /// Level 0 files may overlap, so every overlapping file is consulted
    /// in file-number order (newest first). Deeper levels are disjoint:
    /// binary search yields the one candidate file.
    pub(crate) fn get(
        &self,
        user_key: &[u8],
        snapshot: SeqNo,
        table_cache: &TableCache,
        opts: &ReadOptions,
    ) -> crate::Result<VersionRead> {
        use crate::segment::PointRead;

        let target = InternalKey::new(user_key, snapshot, ValueType::Value);

        let mut files_read = 0usize;
        let mut first_file_read: Option<(usize, Arc<FileMetadata>)> = None;

        let mut read_one = |level: usize,
                            file: &Arc<FileMetadata>|
         -> crate::Result<Option<Option<UserValue>>> {
            if files_read == 0 {
                first_file_read = Some((level, Arc::clone(file)));
            }
            files_read += 1;

            match table_cache.point_read(file.number, file.file_size, &target, opts)? {
                PointRead::Found(value) => Ok(Some(Some(value))),
                PointRead::Deleted => Ok(Some(None)),
                PointRead::NotFound => Ok(None),
            }
        };

        let mut result = None;

        'levels: for level in 0..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }

            if level == 0 {
                // Overlapping files: consult every match, newest first
                let mut candidates = files
                    .iter()
                    .filter(|f| f.contains_user_key(user_key))
                    .collect::<Vec<_>>();

                candidates.sort_by_key(|f| std::cmp::Reverse(f.number));

                for file in candidates {
                    if let Some(outcome) = read_one(level, file)? {
                        result = Some(outcome);
                        break 'levels;
                    }
                }
            } else {
                let index = Self::find_file(files, &target);

                let Some(file) = files.get(index) else {
                    continue;
                };

                if *file.smallest.user_key > *user_key {
                    continue;
                }

                if let Some(outcome) = read_one(level, file)? {
                    result = Some(outcome);
                    break 'levels;
                }
            }
        }

        let seek_charge = if files_read > 1 { first_file_read } else { None };

        Ok(VersionRead {
            value: result.flatten(),
            seek_charge,
        })
    }

    /// File numbers referenced by this version
    pub(crate) fn live_files(&self) -> impl Iterator<Item = u64> + '_ {
        self.files.iter().flatten().map(|f| f.number)
    }
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (level, files) in self.files.iter().enumerate() {
            if files.is_empty() {
                continue;
            }

            writeln!(f, "L{level}:")?;
            for file in files {
                writeln!(
                    f,
                    "  #{} {}B [{:?} .. {:?}]",
                    file.number, file.file_size, file.smallest, file.largest
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn meta(number: u64, smallest: &[u8], largest: &[u8]) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            number,
            1_000,
            InternalKey::new(smallest, 5, ValueType::Value),
            InternalKey::new(largest, 1, ValueType::Value),
        ))
    }

    #[test]
    fn find_file_binary_search() {
        let files = vec![meta(1, b"a", b"c"), meta(2, b"e", b"g"), meta(3, b"i", b"k")];

        let probe = |key: &[u8]| {
            Version::find_file(&files, &InternalKey::new(key, crate::value::MAX_SEQNO, ValueType::Value))
        };

        assert_eq!(0, probe(b"a"));
        assert_eq!(0, probe(b"b"));
        assert_eq!(1, probe(b"d"));
        assert_eq!(1, probe(b"g"));
        assert_eq!(2, probe(b"h"));
        assert_eq!(3, probe(b"z"));
    }

    #[test]
    fn overlap_detection() {
        let mut version = Version::default();
        version.files[1] = vec![meta(1, b"a", b"c"), meta(2, b"e", b"g")];

        let numbers = |files: Vec<Arc<FileMetadata>>| {
            files.iter().map(|f| f.number).collect::<Vec<_>>()
        };

        assert_eq!(vec![1], numbers(version.overlapping_files(1, b"b", b"d")));
        assert_eq!(
            vec![1, 2],
            numbers(version.overlapping_files(1, b"c", b"e"))
        );
        assert!(version.overlapping_files(1, b"x", b"z").is_empty());
    }

    #[test]
    fn file_contains_user_key() {
        let file = meta(1, b"banana", b"melon");

        assert!(file.contains_user_key(b"banana"));
        assert!(file.contains_user_key(b"cherry"));
        assert!(file.contains_user_key(b"melon"));
        assert!(!file.contains_user_key(b"apple"));
        assert!(!file.contains_user_key(b"zucchini"));
    }
}
