use super::block;
use super::format::{write_raw_block, BlockHandle, CompressionType, Footer};
use crate::bloom;
use crate::hash::key_hash;
use crate::serde::Serializable;
use crate::value::InternalKey;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Restart interval of the index block; index entries are sought by
/// binary search anyway, so prefix compression buys nothing there
const INDEX_RESTART_INTERVAL: usize = 1;

/// Segment writer options
pub struct Options {
    /// Path of the segment file to create
    pub path: PathBuf,

    /// Target uncompressed data block size in bytes
    pub block_size: usize,

    /// Keys per restart point in data blocks
    pub block_restart_interval: usize,

    /// Block compression type
    pub compression: CompressionType,

    /// Bloom filter density; 0 disables the filter
    pub bloom_bits_per_key: u8,
}

/// Metadata of a finished segment file
#[derive(Clone, Debug)]
pub struct FinishedSegment {
    /// Size of the finished file in bytes
    pub file_size: u64,

    /// Smallest internal key in the file
    pub smallest: InternalKey,

    /// Largest internal key in the file
    pub largest: InternalKey,

    /// Number of entries written
    pub num_entries: u64,
}

/// Serializes entries into blocks and writes out a segment file.
///
/// Keys must be added in strictly increasing internal-key order.
pub struct Writer {
    opts: Options,

    file: BufWriter<File>,
    offset: u64,

    data_block: block::Builder,
    index_entries: Vec<(Vec<u8>, BlockHandle)>,

    first_key: Option<InternalKey>,
    last_key: Option<InternalKey>,

    bloom_hashes: Vec<u32>,
    num_entries: u64,
}

impl Writer {
    /// Creates a segment file at `opts.path`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn new(opts: Options) -> crate::Result<Self> {
        let file = BufWriter::with_capacity(512_000, File::create(&opts.path)?);
        let restart_interval = opts.block_restart_interval;

        Ok(Self {
            opts,
            file,
            offset: 0,
            data_block: block::Builder::new(restart_interval),
            index_entries: Vec::with_capacity(128),
            first_key: None,
            last_key: None,
            bloom_hashes: Vec::with_capacity(1_000),
            num_entries: 0,
        })
    }

    /// Bytes written to the file so far (finished blocks only)
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Number of entries added so far
    #[must_use]
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> crate::Result<()> {
        debug_assert!(
            self.last_key.as_ref().map_or(true, |last| last < key),
            "keys must be added in strictly increasing order"
        );

        if self.opts.bloom_bits_per_key > 0 {
            self.bloom_hashes.push(key_hash(&key.user_key));
        }

        self.data_block.add(&key.encode(), value);
        self.num_entries += 1;

        if self.first_key.is_none() {
            self.first_key = Some(key.clone());
        }
        self.last_key = Some(key.clone());

        if self.data_block.size_estimate() >= self.opts.block_size {
            self.flush_data_block()?;
        }

        Ok(())
    }

    /// Writes out the buffered data block and registers its index entry.
    ///
    /// The index key is the exact last key of the block: internal keys are
    /// never shortened, truncating them would corrupt the sequence trailer.
    fn flush_data_block(&mut self) -> crate::Result<()> {
        debug_assert!(!self.data_block.is_empty());

        let restart_interval = self.opts.block_restart_interval;
        let contents =
            std::mem::replace(&mut self.data_block, block::Builder::new(restart_interval))
                .finish();

        let handle = self.write_block(contents)?;

        // NOTE: A block is only flushed after at least one add
        #[allow(clippy::expect_used)]
        let last_key = self.last_key.as_ref().expect("block cannot be empty");

        self.index_entries.push((last_key.encode(), handle));

        Ok(())
    }

    /// Compresses (if configured and worthwhile) and writes one block
    fn write_block(&mut self, contents: Vec<u8>) -> crate::Result<BlockHandle> {
        let (contents, compression) = self.maybe_compress(contents);

        let handle = write_raw_block(&mut self.file, self.offset, &contents, compression)?;
        self.offset += handle.size + super::format::BLOCK_TRAILER_SIZE as u64;

        Ok(handle)
    }

    fn maybe_compress(&self, raw: Vec<u8>) -> (Vec<u8>, CompressionType) {
        match self.opts.compression {
            CompressionType::None => (raw, CompressionType::None),

            #[cfg(feature = "zstd")]
            CompressionType::Zstd => match zstd::stream::encode_all(raw.as_slice(), 1) {
                Ok(compressed) if compressed.len() < raw.len() => {
                    (compressed, CompressionType::Zstd)
                }
                _ => (raw, CompressionType::None),
            },

            #[cfg(not(feature = "zstd"))]
            CompressionType::Zstd => (raw, CompressionType::None),
        }
    }

    /// Flushes the last data block, writes the bloom, metaindex and index
    /// blocks plus the footer, and syncs the file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if nothing was added or an IO error occurs.
    pub fn finish(mut self) -> crate::Result<FinishedSegment> {
        if !self.data_block.is_empty() {
            self.flush_data_block()?;
        }

        let (Some(smallest), Some(largest)) = (self.first_key.take(), self.last_key.take())
        else {
            return Err(crate::Error::InvalidArgument(
                "cannot finish an empty segment".to_string(),
            ));
        };

        // Bloom block (never compressed)
        let bloom_handle = if self.opts.bloom_bits_per_key > 0 {
            let filter = bloom::create_filter_from_hashes(
                &self.bloom_hashes,
                self.opts.bloom_bits_per_key,
            );

            let handle = write_raw_block(&mut self.file, self.offset, &filter, CompressionType::None)?;
            self.offset += handle.size + super::format::BLOCK_TRAILER_SIZE as u64;

            Some(handle)
        } else {
            None
        };

        // Metaindex block
        let metaindex_handle = {
            let mut builder = block::Builder::new(self.opts.block_restart_interval);

            if let Some(handle) = bloom_handle {
                let key = format!("filter.{}", bloom::FILTER_POLICY_NAME);
                builder.add(key.as_bytes(), &handle.encode());
            }

            self.write_block(builder.finish())?
        };

        // Index block
        let index_handle = {
            let mut builder = block::Builder::new(INDEX_RESTART_INTERVAL);

            for (key, handle) in std::mem::take(&mut self.index_entries) {
                builder.add(&key, &handle.encode());
            }

            self.write_block(builder.finish())?
        };

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        footer.serialize(&mut self.file)?;
        self.offset += super::format::FOOTER_SIZE as u64;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        Ok(FinishedSegment {
            file_size: self.offset,
            smallest,
            largest,
            num_entries: self.num_entries,
        })
    }

    /// Closes the writer without producing a valid segment; the partial
    /// file is removed.
    pub fn abandon(self) {
        let path = self.opts.path.clone();
        drop(self);

        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!(
                "Failed to remove abandoned segment {}: {e}",
                path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;
    use test_log::test;

    fn options(path: std::path::PathBuf) -> Options {
        Options {
            path,
            block_size: 1_024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            bloom_bits_per_key: 10,
        }
    }

    #[test]
    fn finish_reports_metadata() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000009.sst");

        let mut writer = Writer::new(options(path.clone()))?;

        for i in 0..100u64 {
            let key = InternalKey::new(format!("key{i:04}").into_bytes(), i + 1, ValueType::Value);
            writer.add(&key, b"some value")?;
        }

        let meta = writer.finish()?;

        assert_eq!(100, meta.num_entries);
        assert_eq!(b"key0000", &*meta.smallest.user_key);
        assert_eq!(b"key0099", &*meta.largest.user_key);
        assert_eq!(meta.file_size, std::fs::metadata(&path)?.len());

        Ok(())
    }

    #[test]
    fn finish_empty_is_an_error() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = Writer::new(options(dir.path().join("000009.sst")))?;

        assert!(matches!(
            writer.finish(),
            Err(crate::Error::InvalidArgument(_))
        ));

        Ok(())
    }

    #[test]
    fn small_block_size_splits_blocks() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000009.sst");

        let mut writer = Writer::new(options(path))?;

        for i in 0..200u64 {
            let key = InternalKey::new(format!("key{i:04}").into_bytes(), i + 1, ValueType::Value);
            writer.add(&key, &[0u8; 64])?;
        }

        // 200 * ~80 bytes with 1 KiB blocks: many flushes happened
        // before finish
        assert!(writer.file_size() > 0);
        writer.finish()?;

        Ok(())
    }

    #[test]
    fn abandon_removes_the_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000009.sst");

        let mut writer = Writer::new(options(path.clone()))?;
        let key = InternalKey::new(*b"key", 1, ValueType::Value);
        writer.add(&key, b"value")?;

        assert!(path.exists());
        writer.abandon();
        assert!(!path.exists());

        Ok(())
    }
}
