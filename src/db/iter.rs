//! User-facing range iteration.
//!
//! [`Iter`] pins a snapshot of the engine: the active memtable, the
//! immutable memtable (if any), and the current version, plus the
//! sequence number visible at creation time. Iterating composes one lazy
//! sorted stream per source (memtables, one per level-0 file, one
//! concatenating stream per deeper level) through the k-way merge,
//! surfacing only the newest visible version of each user key and hiding
//! tombstones.
//!
//! Later writes never change what an existing iterator yields: the
//! memtables and the version are refcounted, and segment readers cached
//! by the table cache survive eviction while borrowed.

use crate::config::ReadOptions;
use crate::memtable::MemTable;
use crate::merge::{BoxedIterator, MergeIterator};
use crate::segment::iter::Iter as SegmentIter;
use crate::table_cache::TableCache;
use crate::value::{InternalKey, SeqNo, UserKey, UserValue, ValueType, MAX_SEQNO};
use crate::version::{FileMetadata, Version, NUM_LEVELS};
use std::ops::Bound;
use std::sync::Arc;

/// A pinned range-read snapshot; iterate with `&iter` (or `.into_iter()`)
pub struct Iter {
    pub(crate) mem: Arc<MemTable>,
    pub(crate) imm: Option<Arc<MemTable>>,
    pub(crate) version: Arc<Version>,
    pub(crate) table_cache: Arc<TableCache>,
    pub(crate) snapshot: SeqNo,
    pub(crate) opts: ReadOptions,
    pub(crate) bounds: (Bound<UserKey>, Bound<UserKey>),
}

/// Maps user-key bounds onto internal-key bounds.
///
/// All versions of a user key `k` sort inside
/// `[(k, MAX_SEQNO, Value), (k, 0, Tombstone)]`, newest first.
fn internal_bounds(
    bounds: &(Bound<UserKey>, Bound<UserKey>),
) -> (Bound<InternalKey>, Bound<InternalKey>) {
    let lo = match &bounds.0 {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(key) => Bound::Included(InternalKey::new(
            Arc::clone(key),
            MAX_SEQNO,
            ValueType::Value,
        )),
        Bound::Excluded(key) => {
            Bound::Excluded(InternalKey::new(Arc::clone(key), 0, ValueType::Tombstone))
        }
    };

    let hi = match &bounds.1 {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(key) => {
            Bound::Included(InternalKey::new(Arc::clone(key), 0, ValueType::Tombstone))
        }
        Bound::Excluded(key) => Bound::Excluded(InternalKey::new(
            Arc::clone(key),
            MAX_SEQNO,
            ValueType::Value,
        )),
    };

    (lo, hi)
}

/// The actual iterator, borrowing the pinned snapshot
pub struct DbIterator<'a> {
    iter: Box<dyn DoubleEndedIterator<Item = crate::Result<(UserKey, UserValue)>> + 'a>,
}

impl<'a> DbIterator<'a> {
    fn new(lock: &'a Iter) -> Self {
        let range = internal_bounds(&lock.bounds);

        let mut iters: Vec<BoxedIterator<'a>> = Vec::new();

        // Every level-0 file may overlap every other: one stream per file
        for file in &lock.version.files[0] {
            match lock.table_cache.iter(
                file.number,
                file.file_size,
                lock.opts.clone(),
                range.clone(),
            ) {
                Ok(iter) => iters.push(Box::new(iter)),
                Err(e) => iters.push(Box::new(std::iter::once(Err(e)))),
            }
        }

        // Deeper levels are disjoint: one concatenating stream per level
        for level in 1..NUM_LEVELS {
            if lock.version.files[level].is_empty() {
                continue;
            }

            iters.push(Box::new(LevelIterator::new(
                lock.version.files[level].clone(),
                Arc::clone(&lock.table_cache),
                lock.opts.clone(),
                range.clone(),
            )));
        }

        if let Some(imm) = &lock.imm {
            iters.push(Box::new(imm.range(range.clone()).map(Ok)));
        }

        iters.push(Box::new(lock.mem.range(range).map(Ok)));

        let merged = MergeIterator::new(iters)
            .evict_old_versions(true)
            .snapshot_seqno(lock.snapshot);

        let iter = merged.filter_map(|item| match item {
            Ok((key, value)) => {
                if key.is_tombstone() {
                    None
                } else {
                    Some(Ok((key.user_key, value)))
                }
            }
            Err(e) => Some(Err(e)),
        });

        Self {
            iter: Box::new(iter),
        }
    }
}

impl<'a> Iterator for DbIterator<'a> {
    type Item = crate::Result<(UserKey, UserValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

impl<'a> DoubleEndedIterator for DbIterator<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.iter.next_back()
    }
}

impl<'a> IntoIterator for &'a Iter {
    type IntoIter = DbIterator<'a>;
    type Item = <Self::IntoIter as Iterator>::Item;

    fn into_iter(self) -> Self::IntoIter {
        DbIterator::new(self)
    }
}

/// Concatenates the disjoint, sorted files of one level (>= 1) into a
/// single lazy stream; files are opened through the table cache only
/// when the cursor reaches them
struct LevelIterator {
    files: Vec<Arc<FileMetadata>>,
    table_cache: Arc<TableCache>,
    opts: ReadOptions,
    range: (Bound<InternalKey>, Bound<InternalKey>),

    initialized: bool,
    front_file_idx: usize,
    back_file_idx: Option<usize>,
    front_iter: Option<SegmentIter>,
    back_iter: Option<SegmentIter>,
    errored: bool,
}

impl LevelIterator {
    fn new(
        files: Vec<Arc<FileMetadata>>,
        table_cache: Arc<TableCache>,
        opts: ReadOptions,
        range: (Bound<InternalKey>, Bound<InternalKey>),
    ) -> Self {
        Self {
            files,
            table_cache,
            opts,
            range,
            initialized: false,
            front_file_idx: 0,
            back_file_idx: None,
            front_iter: None,
            back_iter: None,
            errored: false,
        }
    }

    /// Restricts the file window to files that can intersect the range
    fn initialize(&mut self) {
        self.front_file_idx = match &self.range.0 {
            Bound::Unbounded => 0,
            Bound::Included(key) => self.files.partition_point(|f| f.largest < *key),
            Bound::Excluded(key) => self.files.partition_point(|f| f.largest <= *key),
        };

        self.back_file_idx = match &self.range.1 {
            Bound::Unbounded => self.files.len().checked_sub(1),
            Bound::Included(key) | Bound::Excluded(key) => {
                let idx = self.files.partition_point(|f| f.largest < *key);
                Some(idx.min(self.files.len().saturating_sub(1)))
            }
        };

        if self.files.is_empty() {
            self.back_file_idx = None;
        }

        self.initialized = true;
    }

    fn files_remain(&self) -> bool {
        self.back_file_idx
            .is_some_and(|back| self.front_file_idx <= back)
    }

    fn open_file(&self, idx: usize) -> crate::Result<SegmentIter> {
        let file = &self.files[idx];
        self.table_cache
            .iter(file.number, file.file_size, self.opts.clone(), self.range.clone())
    }
}

impl Iterator for LevelIterator {
    type Item = crate::Result<(InternalKey, UserValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }

        if !self.initialized {
            self.initialize();
        }

        loop {
            if let Some(iter) = &mut self.front_iter {
                match iter.next() {
                    Some(Ok(entry)) => return Some(Ok(entry)),
                    Some(Err(e)) => {
                        self.errored = true;
                        return Some(Err(e));
                    }
                    None => self.front_iter = None,
                }
            }

            if self.files_remain() {
                match self.open_file(self.front_file_idx) {
                    Ok(iter) => {
                        self.front_file_idx += 1;
                        self.front_iter = Some(iter);
                    }
                    Err(e) => {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            // No middle files left: drain the back cursor from its front
            return match self.back_iter.as_mut()?.next() {
                Some(Ok(entry)) => Some(Ok(entry)),
                Some(Err(e)) => {
                    self.errored = true;
                    Some(Err(e))
                }
                None => {
                    self.back_iter = None;
                    None
                }
            };
        }
    }
}

impl DoubleEndedIterator for LevelIterator {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }

        if !self.initialized {
            self.initialize();
        }

        loop {
            if let Some(iter) = &mut self.back_iter {
                match iter.next_back() {
                    Some(Ok(entry)) => return Some(Ok(entry)),
                    Some(Err(e)) => {
                        self.errored = true;
                        return Some(Err(e));
                    }
                    None => self.back_iter = None,
                }
            }

            if self.files_remain() {
                // NOTE: files_remain checked it is Some
                #[allow(clippy::expect_used)]
                let idx = self.back_file_idx.expect("back file should exist");

                match self.open_file(idx) {
                    Ok(iter) => {
                        self.back_file_idx = idx.checked_sub(1);
                        self.back_iter = Some(iter);
                    }
                    Err(e) => {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            // No middle files left: drain the front cursor from its back
            return match self.front_iter.as_mut()?.next_back() {
                Some(Ok(entry)) => Some(Ok(entry)),
                Some(Err(e)) => {
                    self.errored = true;
                    Some(Err(e))
                }
                None => {
                    self.front_iter = None;
                    None
                }
            };
        }
    }
}
