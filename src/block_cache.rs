use crate::segment::block::DataBlock;
use quick_cache::sync::Cache;
use quick_cache::Weighter;
use std::sync::Arc;

// (Segment file number, block offset)
type CacheKey = (u64, u64);

#[derive(Clone)]
struct BlockWeighter;

impl Weighter<CacheKey, Arc<DataBlock>> for BlockWeighter {
    fn weight(&self, _: &CacheKey, block: &Arc<DataBlock>) -> u32 {
        // NOTE: Truncation is fine: blocks are ~64K max
        #[allow(clippy::cast_possible_truncation)]
        let weight = block.size() as u32;

        weight.max(1)
    }
}

/// Block cache, in which decoded data blocks are cached in-memory
/// after being retrieved from disk.
///
/// This speeds up consecutive queries to nearby data, improving
/// read performance for hot data.
pub struct BlockCache {
    data: Cache<CacheKey, Arc<DataBlock>, BlockWeighter>,
    capacity: u64,
}

impl BlockCache {
    /// Creates a new block cache with the given capacity in bytes.
    ///
    /// A capacity of 0 disables caching.
    #[must_use]
    pub fn with_capacity_bytes(bytes: u64) -> Self {
        Self {
            data: Cache::with_weighter(10_000, bytes.max(1), BlockWeighter),
            capacity: bytes,
        }
    }

    /// Returns the cache capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of cached blocks
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if there are no cached blocks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert(&self, file_number: u64, offset: u64, block: Arc<DataBlock>) {
        if self.capacity > 0 {
            self.data.insert((file_number, offset), block);
        }
    }

    pub(crate) fn get(&self, file_number: u64, offset: u64) -> Option<Arc<DataBlock>> {
        if self.capacity == 0 {
            return None;
        }
        self.data.get(&(file_number, offset))
    }
}
