pub mod block;
pub mod format;
pub mod iter;
pub mod writer;

use self::block::DataBlock;
use self::format::{read_block, BlockHandle, Footer, FOOTER_SIZE};
use crate::block_cache::BlockCache;
use crate::bloom;
use crate::config::ReadOptions;
use crate::value::{InternalKey, UserValue};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Outcome of a point read inside a single segment
#[derive(Debug)]
pub enum PointRead {
    /// The newest visible entry is a regular value
    Found(UserValue),

    /// The newest visible entry is a tombstone
    Deleted,

    /// The segment holds no visible entry for the key
    NotFound,
}

/// An immutable sorted file of internal-keyed entries (a.k.a. `SSTable`).
///
/// The index block and the bloom filter are resident in memory for the
/// lifetime of the reader; data blocks are read on demand through the
/// block cache. Positioned reads on the single file handle are serialized
/// by an internal mutex.
///
/// Shared ownership (`Arc<Segment>`) keeps the reader alive while any
/// iterator borrows it, even if its cache entry is evicted concurrently.
pub struct Segment {
    /// Number of the segment file
    pub file_number: u64,

    file: Mutex<File>,

    /// One entry per data block: the block's last key and its handle
    index: Vec<(InternalKey, BlockHandle)>,

    /// Whole-table bloom filter over user keys
    bloom_filter: Option<Vec<u8>>,

    block_cache: Arc<BlockCache>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment:{}", self.file_number)
    }
}

impl Segment {
    /// Opens a segment file: footer, then index block, then bloom block.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file is malformed or an IO error occurs.
    pub fn open<P: AsRef<Path>>(
        path: P,
        file_number: u64,
        file_size: u64,
        block_cache: Arc<BlockCache>,
        verify_checksums: bool,
    ) -> crate::Result<Self> {
        let path = path.as_ref();

        if file_size < FOOTER_SIZE as u64 {
            return Err(crate::Error::Corruption(format!(
                "segment {} is too short ({file_size} bytes)",
                path.display()
            )));
        }

        let mut file = File::open(path)?;

        let mut footer_buf = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::Start(file_size - FOOTER_SIZE as u64))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let file = Mutex::new(file);

        // Index block
        let index_bytes = read_block(&file, footer.index_handle, verify_checksums)?;
        let index = block::parse_entries(&index_bytes)?
            .into_iter()
            .map(|(key, handle_bytes)| {
                let key = InternalKey::decode(&key).ok_or_else(|| {
                    crate::Error::Corruption("malformed index key".to_string())
                })?;

                let handle = crate::serde::Deserializable::deserialize(
                    &mut std::io::Cursor::new(handle_bytes),
                )
                .map_err(|_| crate::Error::Corruption("malformed index handle".to_string()))?;

                Ok((key, handle))
            })
            .collect::<crate::Result<Vec<_>>>()?;

        // Metaindex block; unknown entries are ignored
        let filter_key = format!("filter.{}", bloom::FILTER_POLICY_NAME);
        let metaindex_bytes = read_block(&file, footer.metaindex_handle, verify_checksums)?;

        let mut bloom_filter = None;
        for (key, value) in block::parse_entries(&metaindex_bytes)? {
            if key == filter_key.as_bytes() {
                let handle: BlockHandle = crate::serde::Deserializable::deserialize(
                    &mut std::io::Cursor::new(value),
                )
                .map_err(|_| crate::Error::Corruption("malformed bloom handle".to_string()))?;

                bloom_filter = Some(read_block(&file, handle, verify_checksums)?);
            }
        }

        Ok(Self {
            file_number,
            file,
            index,
            bloom_filter,
            block_cache,
        })
    }

    /// Number of data blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Conservative check whether the segment may contain `user_key`.
    ///
    /// Returns `true` when no filter exists.
    #[must_use]
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        self.bloom_filter
            .as_ref()
            .map_or(true, |filter| bloom::may_match(filter, user_key))
    }

    /// Index position of the first block whose last key is `>= target`
    pub(crate) fn index_seek(&self, target: &InternalKey) -> usize {
        self.index.partition_point(|(last_key, _)| last_key < target)
    }

    pub(crate) fn index_entries(&self) -> &[(InternalKey, BlockHandle)] {
        &self.index
    }

    /// Loads a data block, consulting and filling the block cache
    pub(crate) fn load_block(
        &self,
        handle: BlockHandle,
        opts: &ReadOptions,
    ) -> crate::Result<Arc<DataBlock>> {
        if let Some(block) = self.block_cache.get(self.file_number, handle.offset) {
            return Ok(block);
        }

        let bytes = read_block(&self.file, handle, opts.verify_checksums)?;
        let block = Arc::new(DataBlock::parse(&bytes)?);

        if opts.fill_cache {
            self.block_cache
                .insert(self.file_number, handle.offset, Arc::clone(&block));
        }

        Ok(block)
    }

    /// Point lookup.
    ///
    /// Seeks the index, consults the bloom filter for the user-key
    /// portion, then seeks the data block. The block seek lands on the
    /// first entry at-or-after the target; reporting a hit requires
    /// user-key equality, which this function (the "saver") checks.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the segment is malformed or an IO error occurs.
    pub fn point_read(&self, target: &InternalKey, opts: &ReadOptions) -> crate::Result<PointRead> {
        let block_idx = self.index_seek(target);

        let Some((_, handle)) = self.index.get(block_idx) else {
            return Ok(PointRead::NotFound);
        };

        if !self.may_contain(&target.user_key) {
            return Ok(PointRead::NotFound);
        }

        let block = self.load_block(*handle, opts)?;

        let Some((key, value)) = block.entries.get(block.seek(target)) else {
            return Ok(PointRead::NotFound);
        };

        if key.user_key != target.user_key {
            return Ok(PointRead::NotFound);
        }

        if key.is_tombstone() {
            Ok(PointRead::Deleted)
        } else {
            Ok(PointRead::Found(value.clone()))
        }
    }
}
