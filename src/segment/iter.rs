//! Two-level segment iterator.
//!
//! The outer level walks the resident index entries; the inner level
//! lazily loads the data block the cursor is in. Blocks are dropped as
//! soon as the cursor leaves them. Both directions are supported; a
//! front and a back cursor converge until all blocks are consumed.

use super::Segment;
use crate::config::ReadOptions;
use crate::value::{InternalKey, UserValue};
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

/// Iterates a segment's entries in internal-key order
pub struct Iter {
    segment: Arc<Segment>,
    opts: ReadOptions,
    range: (Bound<InternalKey>, Bound<InternalKey>),

    initialized: bool,
    /// Next block the front cursor will load
    front_block_idx: usize,
    /// Next block the back cursor will load; `None` when exhausted
    back_block_idx: Option<usize>,

    front_buf: VecDeque<(InternalKey, UserValue)>,
    back_buf: VecDeque<(InternalKey, UserValue)>,

    errored: bool,
}

impl Iter {
    #[must_use]
    pub fn new(segment: Arc<Segment>, opts: ReadOptions) -> Self {
        Self::with_range(segment, opts, (Bound::Unbounded, Bound::Unbounded))
    }

    #[must_use]
    pub fn with_range(
        segment: Arc<Segment>,
        opts: ReadOptions,
        range: (Bound<InternalKey>, Bound<InternalKey>),
    ) -> Self {
        Self {
            segment,
            opts,
            range,
            initialized: false,
            front_block_idx: 0,
            back_block_idx: None,
            front_buf: VecDeque::new(),
            back_buf: VecDeque::new(),
            errored: false,
        }
    }

    /// Restricts the block window to blocks that can intersect the range
    fn initialize(&mut self) {
        let index = self.segment.index_entries();

        self.front_block_idx = match &self.range.0 {
            Bound::Unbounded => 0,
            // Blocks whose last key is below the bound cannot contain it
            Bound::Included(key) => index.partition_point(|(last, _)| last < key),
            Bound::Excluded(key) => index.partition_point(|(last, _)| last <= key),
        };

        self.back_block_idx = match &self.range.1 {
            Bound::Unbounded => index.len().checked_sub(1),
            // The first block whose last key reaches the bound is the last
            // one that can contain in-range entries
            Bound::Included(key) | Bound::Excluded(key) => {
                let idx = index.partition_point(|(last, _)| last < key);
                Some(idx.min(index.len().saturating_sub(1)))
            }
        };

        if index.is_empty() {
            self.back_block_idx = None;
        }

        self.initialized = true;
    }

    /// Loads block `idx` and trims it to the iterator's range
    fn load_trimmed(&self, idx: usize) -> crate::Result<VecDeque<(InternalKey, UserValue)>> {
        let handle = self.segment.index_entries()[idx].1;
        let block = self.segment.load_block(handle, &self.opts)?;

        let entries = &block.entries;

        let start = match &self.range.0 {
            Bound::Unbounded => 0,
            Bound::Included(key) => entries.partition_point(|(k, _)| k < key),
            Bound::Excluded(key) => entries.partition_point(|(k, _)| k <= key),
        };

        let end = match &self.range.1 {
            Bound::Unbounded => entries.len(),
            Bound::Included(key) => entries.partition_point(|(k, _)| k <= key),
            Bound::Excluded(key) => entries.partition_point(|(k, _)| k < key),
        };

        Ok(entries
            .get(start..end.max(start))
            .unwrap_or_default()
            .iter()
            .cloned()
            .collect())
    }

    fn blocks_remain(&self) -> bool {
        self.back_block_idx
            .is_some_and(|back| self.front_block_idx <= back)
    }
}

impl Iterator for Iter {
    type Item = crate::Result<(InternalKey, UserValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }

        if !self.initialized {
            self.initialize();
        }

        loop {
            if let Some(entry) = self.front_buf.pop_front() {
                return Some(Ok(entry));
            }

            if self.blocks_remain() {
                match self.load_trimmed(self.front_block_idx) {
                    Ok(entries) => {
                        self.front_block_idx += 1;
                        self.front_buf = entries;
                    }
                    Err(e) => {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            // All blocks consumed: drain what the back cursor has left over
            return self.back_buf.pop_front().map(Ok);
        }
    }
}

impl DoubleEndedIterator for Iter {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }

        if !self.initialized {
            self.initialize();
        }

        loop {
            if let Some(entry) = self.back_buf.pop_back() {
                return Some(Ok(entry));
            }

            if self.blocks_remain() {
                // NOTE: blocks_remain checked it is Some
                #[allow(clippy::expect_used)]
                let idx = self.back_block_idx.expect("back block should exist");

                match self.load_trimmed(idx) {
                    Ok(entries) => {
                        self.back_block_idx = idx.checked_sub(1);
                        self.back_buf = entries;
                    }
                    Err(e) => {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            // All blocks consumed: drain what the front cursor has left over
            return self.front_buf.pop_back().map(Ok);
        }
    }
}
