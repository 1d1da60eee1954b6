use crate::value::{InternalKey, SeqNo, UserValue, ValueType, MAX_SEQNO};
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

/// Approximate per-entry bookkeeping overhead (skiplist node, tower
/// pointers, refcounts)
const ENTRY_OVERHEAD: u64 = 64;

/// The memtable is the in-memory sorted write buffer.
///
/// All writes land here first; once the memtable crosses the configured
/// size threshold it is frozen, flushed into a level-0 segment by the
/// background worker, and dropped.
///
/// Readers traverse the underlying skiplist lock-free; the single-writer
/// requirement of the skiplist is enforced by the group-commit leader.
/// Shared ownership (engine, point readers, iterators) is expressed with
/// `Arc<MemTable>`.
#[derive(Default)]
pub struct MemTable {
    pub(crate) items: SkipMap<InternalKey, UserValue>,

    /// Approximate memtable size in bytes
    ///
    /// If this grows too large, a flush is triggered
    approximate_size: AtomicU64,
}

impl MemTable {
    /// Returns the newest entry for `key` visible at `snapshot`.
    ///
    /// The returned entry may be a tombstone; the caller distinguishes
    /// "deleted" from "not present".
    pub fn get<K: AsRef<[u8]>>(&self, key: K, snapshot: SeqNo) -> Option<(InternalKey, UserValue)> {
        let key = key.as_ref();

        // Internal keys sort by (user_key ASC, trailer DESC), so the range
        // starting at (key, snapshot, Value) skips everything newer than the
        // snapshot and lands on the newest visible version, if any.
        let start = InternalKey::new(key, snapshot.min(MAX_SEQNO), ValueType::Value);

        let entry = self.items.range(start..).next()?;

        if &*entry.key().user_key == key {
            Some((entry.key().clone(), entry.value().clone()))
        } else {
            None
        }
    }

    /// Inserts an entry.
    ///
    /// Returns the approximate memtable size after the insert.
    pub fn insert(&self, key: InternalKey, value: UserValue) -> u64 {
        let item_size = key.encoded_len() as u64 + value.len() as u64 + ENTRY_OVERHEAD;

        let size_before = self.approximate_size.fetch_add(item_size, Ordering::AcqRel);

        self.items.insert(key, value);

        size_before + item_size
    }

    /// Approximate size of the memtable in bytes
    pub fn approximate_size(&self) -> u64 {
        self.approximate_size.load(Ordering::Acquire)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the memtable holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates all entries in ascending internal-key order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (InternalKey, UserValue)> + '_ {
        self.range((Bound::Unbounded, Bound::Unbounded))
    }

    /// Iterates the entries within the given internal-key bounds
    pub fn range(
        &self,
        bounds: (Bound<InternalKey>, Bound<InternalKey>),
    ) -> impl DoubleEndedIterator<Item = (InternalKey, UserValue)> + '_ {
        self.items
            .range(bounds)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    /// Highest sequence number in the memtable
    pub fn highest_seqno(&self) -> Option<SeqNo> {
        self.items.iter().map(|entry| entry.key().seqno).max()
    }
}
