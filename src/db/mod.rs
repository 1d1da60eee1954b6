mod inner;
mod iter;
mod write;

pub use iter::{DbIterator, Iter};

use self::inner::{DbInner, DbState};
use crate::block_cache::BlockCache;
use crate::coding::read_length_prefixed;
use crate::config::{Config, ReadOptions, WriteOptions};
use crate::file::{log_file_path, parse_file_name, FileType};
use crate::flush;
use crate::memtable::MemTable;
use crate::segment::format::CompressionType;
use crate::table_cache::TableCache;
use crate::value::{InternalKey, SeqNo, UserValue, ValueType};
use crate::version::edit::VersionEdit;
use crate::version::set::VersionSet;
use crate::wal;
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

/// A persistent ordered map from byte-string keys to byte-string values.
///
/// All operations are thread-safe; the handle is cheap to clone. The
/// database shuts down (joining its background worker) when the last
/// handle is dropped — iterators must be dropped before that.
///
/// # Examples
///
/// ```
/// # let folder = tempfile::tempdir()?;
/// use silt::{Config, WriteOptions};
///
/// let db = Config::new(folder).open()?;
///
/// db.put("my_key", "my_value", WriteOptions::default())?;
///
/// let item = db.get("my_key")?;
/// assert_eq!(Some("my_value".as_bytes().into()), item);
///
/// for kv in &db.iter() {
///     let (key, value) = kv?;
///     // ...
/// }
/// #
/// # Ok::<(), silt::Error>(())
/// ```
#[derive(Clone)]
pub struct Db(Arc<DbShell>);

/// Owns the shutdown of the background worker; dropped when the last
/// user handle goes away (the worker's own reference to the inner state
/// does not keep this alive)
struct DbShell {
    inner: Arc<DbInner>,
    bg_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Drop for DbShell {
    fn drop(&mut self) {
        log::debug!("Shutting down database");

        let handle = self
            .bg_thread
            .lock()
            .expect("lock is poisoned")
            .take();

        self.inner.shutdown_and_join(handle);
    }
}

impl Db {
    /// Opens or creates a database as configured.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the folder layout conflicts with the
    /// configuration, prior state is corrupt, or an IO error occurs.
    pub fn open(config: Config) -> crate::Result<Self> {
        log::debug!("Opening database at {}", config.path.display());

        if config.compression == CompressionType::Zstd && !cfg!(feature = "zstd") {
            return Err(crate::Error::InvalidArgument(
                "zstd compression requested, but the zstd feature is disabled".to_string(),
            ));
        }

        if config.path.exists() {
            if config.error_if_exists {
                return Err(crate::Error::InvalidArgument(format!(
                    "{} already exists",
                    config.path.display()
                )));
            }

            if !config.path.is_dir() {
                return Err(crate::Error::InvalidArgument(format!(
                    "{} is not a directory",
                    config.path.display()
                )));
            }
        } else if config.create_if_missing {
            std::fs::create_dir_all(&config.path)?;
        } else {
            return Err(crate::Error::InvalidArgument(format!(
                "{} does not exist (create_if_missing is disabled)",
                config.path.display()
            )));
        }

        let block_cache = Arc::new(BlockCache::with_capacity_bytes(config.block_cache_capacity));

        let table_cache = Arc::new(TableCache::new(
            config.path.clone(),
            config.max_open_files,
            Arc::clone(&block_cache),
            config.paranoid_checks,
        ));

        let mut versions = VersionSet::new(config.path.clone(), config.max_file_size);
        versions.recover()?;

        // Replay WALs younger than the manifest state into level-0 files
        let mut edit = VersionEdit::default();
        Self::replay_wals(&config, &mut versions, &mut edit)?;

        // Fresh WAL + manifest for this incarnation
        versions.allocate_manifest_number();

        let log_number = versions.new_file_number();
        let wal = wal::Writer::create(log_file_path(&config.path, log_number))?;

        edit.log_number = Some(log_number);
        edit.prev_log_number = Some(0);
        versions.log_and_apply(&mut edit)?;

        let state = DbState {
            mem: Arc::new(MemTable::default()),
            imm: None,
            wal: Some(wal),
            log_number,
            versions,
            writers: VecDeque::new(),
            write_results: HashMap::new(),
            next_writer_id: 0,
            bg_error: None,
            bg_work_scheduled: false,
            pending_outputs: HashSet::new(),
        };

        let inner = Arc::new(DbInner {
            config,
            table_cache,
            block_cache,
            state: Mutex::new(state),
            writers_cv: Condvar::new(),
            work_cv: Condvar::new(),
            done_cv: Condvar::new(),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        });

        {
            let mut state = inner.lock_state();
            inner.delete_obsolete_files(&mut state);
            inner.maybe_schedule_compaction(&mut state);
        }

        let bg_thread = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name("silt-bg".to_string())
                .spawn(move || inner.background_main())?
        };

        Ok(Self(Arc::new(DbShell {
            inner,
            bg_thread: Mutex::new(Some(bg_thread)),
        })))
    }

    /// Rebuilds state from every WAL the manifest does not cover.
    ///
    /// Each recovered memtable is written out as a level-0 file and added
    /// to `edit`, so the following manifest snapshot names it.
    fn replay_wals(
        config: &Config,
        versions: &mut VersionSet,
        edit: &mut VersionEdit,
    ) -> crate::Result<()> {
        let min_log = versions.log_number();
        let prev_log = versions.prev_log_number();

        let mut log_numbers = Vec::new();

        for entry in std::fs::read_dir(&config.path)? {
            let entry = entry?;

            if let Some(FileType::Log(number)) =
                entry.file_name().to_str().and_then(parse_file_name)
            {
                if number >= min_log || (prev_log != 0 && number == prev_log) {
                    log_numbers.push(number);
                }
            }
        }

        log_numbers.sort_unstable();

        let mut max_sequence: SeqNo = 0;

        for number in log_numbers {
            versions.mark_file_number_used(number);

            log::info!("Replaying WAL {number:06}");
            let mem = Arc::new(MemTable::default());

            let mut reader = wal::Reader::open(log_file_path(&config.path, number))?;
            while let Some(record) = reader.read_record()? {
                max_sequence = max_sequence.max(Self::apply_batch_record(&record, &mem)?);
            }

            if !mem.is_empty() {
                let file_number = versions.new_file_number();

                let meta = flush::write_memtable_to_segment(
                    config,
                    &flush::Options {
                        memtable: mem,
                        file_number,
                    },
                )?;

                edit.add_file(0, file_number, meta.file_size, meta.smallest, meta.largest);
            }
        }

        if max_sequence > versions.last_sequence() {
            versions.set_last_sequence(max_sequence);
        }

        Ok(())
    }

    /// Applies one group-commit WAL record to a memtable; returns the
    /// highest sequence number it carried
    fn apply_batch_record(record: &[u8], mem: &MemTable) -> crate::Result<SeqNo> {
        let corrupt = |what: &str| crate::Error::Corruption(format!("WAL batch: {what}"));

        let mut cursor = std::io::Cursor::new(record);

        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt("missing entry count"))?;

        let mut max_sequence = 0;

        for _ in 0..count {
            let sequence = cursor
                .read_u64::<LittleEndian>()
                .map_err(|_| corrupt("missing sequence"))?;
            let value_type = cursor.read_u8().map_err(|_| corrupt("missing op type"))?;
            let value_type =
                ValueType::try_from(value_type).map_err(|t| corrupt(&format!("op type {t}")))?;

            let key = read_length_prefixed(&mut cursor).map_err(|_| corrupt("missing key"))?;
            let value = read_length_prefixed(&mut cursor).map_err(|_| corrupt("missing value"))?;

            mem.insert(InternalKey::new(key, sequence, value_type), value.into());
            max_sequence = max_sequence.max(sequence);
        }

        if (cursor.position() as usize) != record.len() {
            return Err(corrupt("trailing bytes"));
        }

        Ok(max_sequence)
    }

    /// Inserts a key-value pair.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the pair is oversized, the engine carries a
    /// background error, or an IO error occurs.
    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &self,
        key: K,
        value: V,
        opts: WriteOptions,
    ) -> crate::Result<()> {
        self.0.inner.write(
            key.as_ref().into(),
            value.as_ref().into(),
            ValueType::Value,
            opts,
        )
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// Deleting a key that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine carries a background error or an
    /// IO error occurs.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K, opts: WriteOptions) -> crate::Result<()> {
        self.0
            .inner
            .write(key.as_ref().into(), [].into(), ValueType::Tombstone, opts)
    }

    /// Point read; returns `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Will return `Err` on corruption or IO failure.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Option<UserValue>> {
        self.get_with_options(key, &ReadOptions::default())
    }

    /// [`Db::get`] with explicit read options.
    ///
    /// # Errors
    ///
    /// Will return `Err` on corruption or IO failure.
    pub fn get_with_options<K: AsRef<[u8]>>(
        &self,
        key: K,
        opts: &ReadOptions,
    ) -> crate::Result<Option<UserValue>> {
        let inner = &self.0.inner;
        let key = key.as_ref();

        // Snapshot the read sources, then read with the mutex released
        let (mem, imm, version, snapshot) = {
            let state = inner.lock_state();
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                state.versions.current(),
                state.versions.last_sequence(),
            )
        };

        if let Some((found, value)) = mem.get(key, snapshot) {
            return Ok((!found.is_tombstone()).then_some(value));
        }

        if let Some(imm) = imm {
            if let Some((found, value)) = imm.get(key, snapshot) {
                return Ok((!found.is_tombstone()).then_some(value));
            }
        }

        let read = match version.get(key, snapshot, &inner.table_cache, opts) {
            Ok(read) => read,
            Err(e) => {
                // With paranoid checks, a corrupt block also stops all
                // background work until reopen
                if inner.config.paranoid_checks && e.is_corruption() {
                    let mut state = inner.lock_state();
                    if state.bg_error.is_none() {
                        state.bg_error = Some(e.duplicate());
                    }
                }
                return Err(e);
            }
        };

        // Reading a key that had to touch several files is compaction
        // pressure: charge the first file and arm a seek-triggered
        // compaction once its allowance runs out
        if let Some((level, file)) = read.seek_charge {
            let previous = file
                .allowed_seeks
                .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);

            if previous == 1 {
                *version.file_to_compact.lock().expect("lock is poisoned") =
                    Some((level, file));

                let mut state = inner.lock_state();
                inner.maybe_schedule_compaction(&mut state);
            }
        }

        Ok(read.value)
    }

    /// Creates a pinned snapshot over the whole key space.
    ///
    /// Iterate it with `for kv in &iter`; the iterator also runs
    /// backwards via [`DoubleEndedIterator`].
    #[must_use]
    pub fn iter(&self) -> Iter {
        self.create_iter((Bound::Unbounded, Bound::Unbounded), ReadOptions::default())
    }

    /// [`Db::iter`] with explicit read options
    #[must_use]
    pub fn iter_with_options(&self, opts: ReadOptions) -> Iter {
        self.create_iter((Bound::Unbounded, Bound::Unbounded), opts)
    }

    /// Creates a pinned snapshot over a range of user keys.
    ///
    /// # Examples
    ///
    /// ```
    /// # let folder = tempfile::tempdir()?;
    /// # use silt::{Config, WriteOptions};
    /// # let db = Config::new(folder).open()?;
    /// db.put("a", "1", WriteOptions::default())?;
    /// db.put("f", "2", WriteOptions::default())?;
    ///
    /// let range = db.range("a".."e");
    /// assert_eq!(1, (&range).into_iter().count());
    /// #
    /// # Ok::<(), silt::Error>(())
    /// ```
    #[must_use]
    pub fn range<K: AsRef<[u8]>, R: RangeBounds<K>>(&self, range: R) -> Iter {
        self.range_with_options(range, ReadOptions::default())
    }

    /// [`Db::range`] with explicit read options
    #[must_use]
    pub fn range_with_options<K: AsRef<[u8]>, R: RangeBounds<K>>(
        &self,
        range: R,
        opts: ReadOptions,
    ) -> Iter {
        let lo = match range.start_bound() {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(key) => Bound::Included(key.as_ref().into()),
            Bound::Excluded(key) => Bound::Excluded(key.as_ref().into()),
        };

        let hi = match range.end_bound() {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(key) => Bound::Included(key.as_ref().into()),
            Bound::Excluded(key) => Bound::Excluded(key.as_ref().into()),
        };

        self.create_iter((lo, hi), opts)
    }

    fn create_iter(
        &self,
        bounds: (Bound<crate::UserKey>, Bound<crate::UserKey>),
        opts: ReadOptions,
    ) -> Iter {
        let inner = &self.0.inner;
        let state = inner.lock_state();

        Iter {
            mem: Arc::clone(&state.mem),
            imm: state.imm.clone(),
            version: state.versions.current(),
            table_cache: Arc::clone(&inner.table_cache),
            snapshot: state.versions.last_sequence(),
            opts,
            bounds,
        }
    }

    /// Number of segment files at `level`; intended for tests and
    /// instrumentation
    #[must_use]
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.0.inner.lock_state().versions.num_level_files(level)
    }

    /// Approximate size of the active memtable in bytes
    #[must_use]
    pub fn memtable_size(&self) -> u64 {
        self.0.inner.lock_state().mem.approximate_size()
    }

    /// Deletes every engine-owned file in `path`, then the folder itself
    /// if it ended up empty.
    ///
    /// The database must not be open.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn destroy<P: AsRef<Path>>(path: P) -> crate::Result<()> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(path)? {
            let entry = entry?;

            let owned = entry
                .file_name()
                .to_str()
                .and_then(parse_file_name)
                .is_some();

            if owned {
                std::fs::remove_file(entry.path())?;
            }
        }

        // Foreign files keep the folder alive
        let _ = std::fs::remove_dir(path);

        Ok(())
    }
}
