use crate::block_cache::BlockCache;
use crate::config::ReadOptions;
use crate::file::table_file_path;
use crate::segment::iter::Iter as SegmentIter;
use crate::segment::{PointRead, Segment};
use crate::value::InternalKey;
use quick_cache::sync::Cache;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

/// Cache of opened segment readers, keyed by file number.
///
/// A cache hit hands out a clone of the shared reader; eviction therefore
/// never destroys a reader that an iterator still borrows — the reader
/// survives until the cache entry is gone *and* every borrower released
/// its clone.
pub struct TableCache {
    base_path: PathBuf,
    cache: Cache<u64, Arc<Segment>>,
    block_cache: Arc<BlockCache>,
    paranoid_checks: bool,
}

impl TableCache {
    /// Creates a table cache holding at most `max_open_files` readers
    #[must_use]
    pub fn new(
        base_path: PathBuf,
        max_open_files: usize,
        block_cache: Arc<BlockCache>,
        paranoid_checks: bool,
    ) -> Self {
        Self {
            base_path,
            cache: Cache::new(max_open_files.max(1)),
            block_cache,
            paranoid_checks,
        }
    }

    /// Returns the cached reader for the given file, opening it on a miss.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the segment cannot be opened.
    pub fn get_segment(&self, file_number: u64, file_size: u64) -> crate::Result<Arc<Segment>> {
        if let Some(segment) = self.cache.get(&file_number) {
            return Ok(segment);
        }

        let path = table_file_path(&self.base_path, file_number);

        let segment = Arc::new(Segment::open(
            path,
            file_number,
            file_size,
            Arc::clone(&self.block_cache),
            self.paranoid_checks,
        )?);

        self.cache.insert(file_number, Arc::clone(&segment));

        Ok(segment)
    }

    /// With paranoid checks, every block read is verified, no matter
    /// what the caller's read options say
    fn effective_opts(&self, opts: &ReadOptions) -> ReadOptions {
        let mut opts = opts.clone();
        opts.verify_checksums |= self.paranoid_checks;
        opts
    }

    /// Point lookup through the cache
    ///
    /// # Errors
    ///
    /// Will return `Err` if the segment is malformed or an IO error occurs.
    pub fn point_read(
        &self,
        file_number: u64,
        file_size: u64,
        target: &InternalKey,
        opts: &ReadOptions,
    ) -> crate::Result<PointRead> {
        let segment = self.get_segment(file_number, file_size)?;
        segment.point_read(target, &self.effective_opts(opts))
    }

    /// Bloom filter check through the cache; conservative if no filter exists
    ///
    /// # Errors
    ///
    /// Will return `Err` if the segment cannot be opened.
    pub fn may_contain(
        &self,
        file_number: u64,
        file_size: u64,
        user_key: &[u8],
    ) -> crate::Result<bool> {
        let segment = self.get_segment(file_number, file_size)?;
        Ok(segment.may_contain(user_key))
    }

    /// Creates an iterator over the segment; the iterator shares ownership
    /// of the reader
    ///
    /// # Errors
    ///
    /// Will return `Err` if the segment cannot be opened.
    pub fn iter(
        &self,
        file_number: u64,
        file_size: u64,
        opts: ReadOptions,
        range: (Bound<InternalKey>, Bound<InternalKey>),
    ) -> crate::Result<SegmentIter> {
        let segment = self.get_segment(file_number, file_size)?;
        Ok(SegmentIter::with_range(
            segment,
            self.effective_opts(&opts),
            range,
        ))
    }

    /// Drops the cache entry for a deleted file
    pub fn evict(&self, file_number: u64) {
        self.cache.remove(&file_number);
    }
}
