use crate::segment::format::CompressionType;
use crate::Db;
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Clone)]
pub struct Config {
    /// Database folder path
    pub path: PathBuf,

    /// Create the folder on open if it is absent
    pub create_if_missing: bool,

    /// Fail on open if the folder already exists
    pub error_if_exists: bool,

    /// Memtable rotation threshold in bytes
    pub write_buffer_size: u64,

    /// Compaction output file seal target in bytes
    pub max_file_size: u64,

    /// Target uncompressed data-block size in bytes
    pub block_size: usize,

    /// Keys per restart point within a data block
    pub block_restart_interval: usize,

    /// Block compression type
    pub compression: CompressionType,

    /// Bloom filter bits per key; 0 disables bloom filters
    pub bloom_bits_per_key: u8,

    /// Block cache capacity in bytes; 0 disables the cache
    pub block_cache_capacity: u64,

    /// Soft upper bound on cached open segment readers
    pub max_open_files: usize,

    /// Verify block CRCs on every read
    pub paranoid_checks: bool,
}

const DEFAULT_FOLDER: &str = ".silt.data";

impl Default for Config {
    fn default() -> Self {
        Self {
            path: DEFAULT_FOLDER.into(),
            create_if_missing: true,
            error_if_exists: false,
            write_buffer_size: /* 4 MiB */ 4 * 1_024 * 1_024,
            max_file_size: /* 2 MiB */ 2 * 1_024 * 1_024,
            block_size: /* 4 KiB */ 4 * 1_024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            bloom_bits_per_key: 10,
            block_cache_capacity: /* 8 MiB */ 8 * 1_024 * 1_024,
            max_open_files: 1_000,
            paranoid_checks: false,
        }
    }
}

impl Config {
    /// Initializes a new config
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            ..Default::default()
        }
    }

    /// Sets whether a missing database folder is created on open.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn create_if_missing(mut self, flag: bool) -> Self {
        self.create_if_missing = flag;
        self
    }

    /// Sets whether opening an existing database folder is an error.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn error_if_exists(mut self, flag: bool) -> Self {
        self.error_if_exists = flag;
        self
    }

    /// Sets the memtable rotation threshold.
    ///
    /// Defaults to 4 MiB.
    #[must_use]
    pub fn write_buffer_size(mut self, bytes: u64) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    /// Sets the compaction output file seal target.
    ///
    /// Defaults to 2 MiB.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the block size.
    ///
    /// Defaults to 4 KiB (4096 bytes).
    ///
    /// # Panics
    ///
    /// Panics if the block size is smaller than 1 KiB (1024 bytes).
    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Self {
        assert!(block_size >= 1_024);

        self.block_size = block_size;
        self
    }

    /// Sets the number of keys per restart point.
    ///
    /// Defaults to 16. Most clients should leave this alone.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn block_restart_interval(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.block_restart_interval = n;
        self
    }

    /// Sets the block compression type.
    ///
    /// Defaults to no compression. Zstd requires the `zstd` feature.
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the bloom filter density; 0 disables bloom filters.
    ///
    /// Defaults to 10 bits per key (~1% false positives).
    #[must_use]
    pub fn bloom_bits_per_key(mut self, bits: u8) -> Self {
        self.bloom_bits_per_key = bits;
        self
    }

    /// Sets the block cache capacity in bytes; 0 disables the cache.
    ///
    /// Defaults to 8 MiB.
    #[must_use]
    pub fn block_cache_capacity(mut self, bytes: u64) -> Self {
        self.block_cache_capacity = bytes;
        self
    }

    /// Sets the soft upper bound on cached open segment readers.
    ///
    /// Defaults to 1000.
    #[must_use]
    pub fn max_open_files(mut self, n: usize) -> Self {
        self.max_open_files = n;
        self
    }

    /// Sets whether block CRCs are verified on every read.
    ///
    /// Defaults to `false`; checksums of WAL and manifest records are
    /// always verified.
    #[must_use]
    pub fn paranoid_checks(mut self, flag: bool) -> Self {
        self.paranoid_checks = flag;
        self
    }

    /// Opens a database using the config.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open(self) -> crate::Result<Db> {
        Db::open(self)
    }
}

/// Options that control read operations
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Verify block CRCs for reads done under these options
    pub verify_checksums: bool,

    /// Cache blocks read for this operation; bulk scans may want `false`
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}

/// Options that control write operations
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    /// Force the WAL to stable storage before acknowledging the write.
    ///
    /// A crash after an acknowledged sync write never loses it. Without
    /// sync, a process crash loses nothing, but a machine crash may lose
    /// the most recent writes.
    pub sync: bool,
}
