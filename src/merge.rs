use crate::value::{InternalKey, SeqNo, UserValue};
use min_max_heap::MinMaxHeap;

/// An iterator over internal entries, in ascending internal-key order
pub type BoxedIterator<'a> =
    Box<dyn DoubleEndedIterator<Item = crate::Result<(InternalKey, UserValue)>> + 'a>;

type IteratorIndex = usize;

#[derive(Debug)]
struct HeapItem {
    index: IteratorIndex,
    key: InternalKey,
    value: UserValue,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.key, self.index).cmp(&(&other.key, other.index))
    }
}

/// Merges N iterators into one sorted stream using a k-way merge.
///
/// With `evict_old_versions`, only the newest visible version of each user
/// key survives (older versions and everything below a tombstone are
/// swallowed); tombstones themselves are still yielded so that the caller
/// can distinguish "deleted" from "absent". With `snapshot_seqno`, entries
/// newer than the snapshot are invisible.
pub struct MergeIterator<'a> {
    iterators: Vec<BoxedIterator<'a>>,
    heap: MinMaxHeap<HeapItem>,
    initialized: bool,
    evict_old_versions: bool,
    seqno: Option<SeqNo>,
}

impl<'a> MergeIterator<'a> {
    /// Initializes a new merge iterator
    #[must_use]
    pub fn new(iterators: Vec<BoxedIterator<'a>>) -> Self {
        Self {
            iterators,
            heap: MinMaxHeap::new(),
            initialized: false,
            evict_old_versions: false,
            seqno: None,
        }
    }

    #[must_use]
    pub fn evict_old_versions(mut self, v: bool) -> Self {
        self.evict_old_versions = v;
        self
    }

    /// Only entries with `seqno <= v` are visible
    #[must_use]
    pub fn snapshot_seqno(mut self, v: SeqNo) -> Self {
        self.seqno = Some(v);
        self
    }

    fn visible(&self, seqno: SeqNo) -> bool {
        self.seqno.map_or(true, |snapshot| seqno <= snapshot)
    }

    fn advance_iter(&mut self, idx: usize) -> crate::Result<()> {
        // NOTE: Index comes off the heap, it was valid when pushed
        #[allow(clippy::expect_used)]
        let iterator = self.iterators.get_mut(idx).expect("iter should exist");

        if let Some(value) = iterator.next() {
            let (key, value) = value?;
            self.heap.push(HeapItem { index: idx, key, value });
        }

        Ok(())
    }

    fn advance_iter_backwards(&mut self, idx: usize) -> crate::Result<()> {
        // NOTE: Index comes off the heap, it was valid when pushed
        #[allow(clippy::expect_used)]
        let iterator = self.iterators.get_mut(idx).expect("iter should exist");

        if let Some(value) = iterator.next_back() {
            let (key, value) = value?;
            self.heap.push(HeapItem { index: idx, key, value });
        }

        Ok(())
    }

    fn push_next(&mut self) -> crate::Result<()> {
        for idx in 0..self.iterators.len() {
            self.advance_iter(idx)?;
        }

        Ok(())
    }

    fn push_next_back(&mut self) -> crate::Result<()> {
        for idx in 0..self.iterators.len() {
            self.advance_iter_backwards(idx)?;
        }

        Ok(())
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = crate::Result<(InternalKey, UserValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.initialized {
            if let Err(e) = self.push_next() {
                return Some(Err(e));
            };
            self.initialized = true;
        }

        while let Some(mut head) = self.heap.pop_min() {
            if let Err(e) = self.advance_iter(head.index) {
                return Some(Err(e));
            }

            if head.key.is_tombstone() || self.evict_old_versions {
                // Consume the remaining (older) versions of this user key.
                // If the head itself is above the snapshot, the next visible
                // version takes its place.
                while let Some(next) = self.heap.pop_min() {
                    if next.key.user_key == head.key.user_key {
                        if let Err(e) = self.advance_iter(next.index) {
                            return Some(Err(e));
                        }

                        if !self.visible(head.key.seqno) {
                            head = next;
                        }
                    } else {
                        // Reached the next user key, restore it and exit
                        self.heap.push(next);
                        break;
                    }
                }
            }

            if !self.visible(head.key.seqno) {
                continue;
            }

            return Some(Ok((head.key, head.value)));
        }

        None
    }
}

impl<'a> DoubleEndedIterator for MergeIterator<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if !self.initialized {
            if let Err(e) = self.push_next_back() {
                return Some(Err(e));
            };
            self.initialized = true;
        }

        while let Some(mut head) = self.heap.pop_max() {
            if let Err(e) = self.advance_iter_backwards(head.index) {
                return Some(Err(e));
            }

            let mut reached_tombstone = false;

            if self.evict_old_versions {
                // Traversing backwards, versions of a user key arrive oldest
                // first, so each newer visible version replaces the head
                while let Some(next) = self.heap.pop_max() {
                    if next.key.user_key == head.key.user_key {
                        if reached_tombstone {
                            continue;
                        }

                        if let Err(e) = self.advance_iter_backwards(next.index) {
                            return Some(Err(e));
                        }

                        if next.key.is_tombstone() && self.visible(next.key.seqno) {
                            reached_tombstone = true;
                        }

                        if self.visible(next.key.seqno) {
                            head = next;
                        }
                    } else {
                        // Reached the next user key, restore it and exit
                        self.heap.push(next);
                        break;
                    }
                }
            }

            if reached_tombstone {
                continue;
            }

            if !self.visible(head.key.seqno) {
                continue;
            }

            return Some(Ok((head.key, head.value)));
        }

        None
    }
}
