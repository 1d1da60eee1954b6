use super::edit::VersionEdit;
use super::{FileMetadata, Version, L0_COMPACTION_TRIGGER, NUM_LEVELS};
use crate::compaction::Compaction;
use crate::comparator::COMPARATOR_NAME;
use crate::file::{manifest_file_path, read_current_file, set_current_file, FileType};
use crate::value::{InternalKey, SeqNo};
use crate::wal;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// Owns the current [`Version`] and journals every transition to the
/// manifest.
///
/// Old versions stay alive exactly as long as some reader holds their
/// `Arc`; file metadata is shared between versions the same way, so a
/// file's metadata is dropped only when the last version referencing it
/// goes away.
pub struct VersionSet {
    path: PathBuf,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SeqNo,
    log_number: u64,

    /// WAL of the immutable memtable being flushed, 0 if none
    prev_log_number: u64,

    current: Arc<Version>,

    /// Superseded versions still pinned by readers and iterators; their
    /// files must not be unlinked until the last pin is dropped
    live_versions: Vec<Weak<Version>>,

    manifest: Option<wal::Writer>,

    /// Per-level key at which the next compaction at that level should
    /// start; rotates through the level over successive compactions
    compact_pointer: [Option<InternalKey>; NUM_LEVELS],

    /// Compaction output seal target, from the configuration
    max_file_size: u64,
}

impl VersionSet {
    /// Creates an empty version set for the given database folder
    #[must_use]
    pub fn new(path: PathBuf, max_file_size: u64) -> Self {
        Self {
            path,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            current: Arc::new(Version::default()),
            live_versions: Vec::new(),
            manifest: None,
            compact_pointer: Default::default(),
            max_file_size,
        }
    }

    /// The current version
    #[must_use]
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    /// Allocates a fresh file number
    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Hands back `number` unless a newer one was allocated since
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    /// Bumps the file-number counter past `number`
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Last applied sequence number
    #[must_use]
    pub fn last_sequence(&self) -> SeqNo {
        self.last_sequence
    }

    /// Advances the last applied sequence number
    pub fn set_last_sequence(&mut self, seqno: SeqNo) {
        debug_assert!(seqno >= self.last_sequence);
        self.last_sequence = seqno;
    }

    /// WAL number of the active memtable
    #[must_use]
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// WAL number of the immutable memtable being flushed, 0 if none
    #[must_use]
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    /// Number of files at `level` in the current version
    #[must_use]
    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    /// File numbers referenced by the current version or any superseded
    /// version that a reader still pins
    #[must_use]
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live: HashSet<u64> = self.current.live_files().collect();

        for version in &self.live_versions {
            if let Some(version) = version.upgrade() {
                live.extend(version.live_files());
            }
        }

        live
    }

    /// Makes `version` current, remembering the superseded one for as
    /// long as readers pin it
    fn install(&mut self, version: Version) {
        self.live_versions.retain(|v| v.strong_count() > 0);
        self.live_versions.push(Arc::downgrade(&self.current));
        self.current = Arc::new(version);
    }

    /// Number of the manifest file in use
    #[must_use]
    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// Applies `edit` to the current version, journals it, and installs
    /// the result as the new current version.
    ///
    /// # Errors
    ///
    /// Will return `Err` if journaling fails; the version set is left
    /// unchanged in that case.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> crate::Result<()> {
        if let Some(log_number) = edit.log_number {
            debug_assert!(log_number >= self.log_number);
            debug_assert!(log_number < self.next_file_number);
        } else {
            edit.log_number = Some(self.log_number);
        }

        if edit.prev_log_number.is_none() {
            edit.prev_log_number = Some(self.prev_log_number);
        }

        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);

        let version = {
            let mut builder = Builder::new(self.current());
            builder.apply(edit);
            let mut version = builder.finish();
            Self::finalize(&mut version);
            version
        };

        // A fresh manifest starts with a snapshot of the current state
        let mut created_manifest = false;

        if self.manifest.is_none() {
            let manifest_path = manifest_file_path(&self.path, self.manifest_file_number);
            log::debug!("Creating manifest {}", manifest_path.display());

            let mut writer = wal::Writer::create(&manifest_path)?;

            match self.write_snapshot(&mut writer) {
                Ok(()) => {
                    self.manifest = Some(writer);
                    created_manifest = true;
                }
                Err(e) => {
                    drop(writer);
                    let _ = std::fs::remove_file(&manifest_path);
                    return Err(e);
                }
            }
        }

        let result = (|| {
            // NOTE: Just created or pre-existing
            #[allow(clippy::expect_used)]
            let manifest = self.manifest.as_mut().expect("manifest should be open");

            manifest.add_record(&edit.encode())?;
            manifest.sync()?;

            if created_manifest {
                set_current_file(&self.path, self.manifest_file_number)?;
            }

            Ok(())
        })();

        if let Err(e) = result {
            if created_manifest {
                self.manifest = None;
                let _ = std::fs::remove_file(manifest_file_path(
                    &self.path,
                    self.manifest_file_number,
                ));
            }
            return Err(e);
        }

        // Install the new version
        self.install(version);

        // NOTE: Filled in above
        self.log_number = edit.log_number.unwrap_or(self.log_number);
        self.prev_log_number = edit.prev_log_number.unwrap_or(self.prev_log_number);

        for (level, key) in &edit.compact_pointers {
            self.compact_pointer[*level] = Some(key.clone());
        }

        Ok(())
    }

    /// Writes a snapshot edit describing the complete current state
    fn write_snapshot(&self, writer: &mut wal::Writer) -> crate::Result<()> {
        let mut edit = VersionEdit {
            comparator_name: Some(COMPARATOR_NAME.to_string()),
            ..Default::default()
        };

        for (level, pointer) in self.compact_pointer.iter().enumerate() {
            if let Some(key) = pointer {
                edit.compact_pointers.push((level, key.clone()));
            }
        }

        for (level, files) in self.current.files.iter().enumerate() {
            for file in files {
                edit.add_file(
                    level,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
            }
        }

        writer.add_record(&edit.encode())
    }

    /// Replays the manifest named by `CURRENT` (or, failing that, the
    /// youngest `MANIFEST-*` in the folder) and restores the version
    /// state it describes.
    ///
    /// Returns `false` if no manifest exists (fresh database).
    ///
    /// # Errors
    ///
    /// Will return `Err` on corruption, a comparator mismatch, or IO
    /// failure.
    pub fn recover(&mut self) -> crate::Result<bool> {
        let Some(manifest_number) = self.find_manifest()? else {
            log::debug!("No manifest found, starting fresh");
            return Ok(false);
        };

        let manifest_path = manifest_file_path(&self.path, manifest_number);
        log::info!("Recovering from manifest {}", manifest_path.display());

        let mut reader = wal::Reader::open(&manifest_path)?;

        let mut builder = Builder::new(self.current());

        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut edit_count = 0usize;

        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;

            if let Some(name) = &edit.comparator_name {
                if name != COMPARATOR_NAME {
                    return Err(crate::Error::InvalidArgument(format!(
                        "comparator mismatch: manifest uses {name}, engine uses {COMPARATOR_NAME}"
                    )));
                }
            }

            builder.apply(&edit);

            for (level, key) in &edit.compact_pointers {
                self.compact_pointer[*level] = Some(key.clone());
            }

            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);

            edit_count += 1;
        }

        let Some(next_file_number) = next_file_number else {
            return Err(crate::Error::Corruption(
                "manifest carries no next-file-number entry".to_string(),
            ));
        };

        let mut version = builder.finish();
        Self::finalize(&mut version);

        self.install(version);
        self.next_file_number = next_file_number;
        self.last_sequence = last_sequence.unwrap_or(0);
        self.log_number = log_number.unwrap_or(0);
        self.prev_log_number = prev_log_number.unwrap_or(0);

        self.mark_file_number_used(self.log_number);
        self.mark_file_number_used(self.prev_log_number);

        log::info!(
            "Recovered {} edits: {} files, last_sequence={}, log={}",
            edit_count,
            self.current.live_files().count(),
            self.last_sequence,
            self.log_number,
        );

        Ok(true)
    }

    /// Assigns the number the next manifest will be created under.
    ///
    /// Called once per open, after recovery; the first
    /// [`VersionSet::log_and_apply`] then starts a fresh manifest with a
    /// snapshot.
    pub fn allocate_manifest_number(&mut self) {
        self.manifest_file_number = self.new_file_number();
    }

    fn find_manifest(&self) -> crate::Result<Option<u64>> {
        if let Some(number) = read_current_file(&self.path) {
            if manifest_file_path(&self.path, number).exists() {
                return Ok(Some(number));
            }

            log::warn!("CURRENT points at a missing manifest, scanning folder");
        }

        // CURRENT is optional: fall back to the youngest manifest on disk
        let mut youngest = None;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;

            if let Some(FileType::Manifest(number)) =
                entry.file_name().to_str().and_then(crate::file::parse_file_name)
            {
                youngest = youngest.max(Some(number));
            }
        }

        Ok(youngest)
    }

    /// Precomputes the compaction score of a freshly built version.
    ///
    /// Level 0 is scored by file count: with small write buffers it would
    /// otherwise never reach a byte threshold, yet every L0 file is
    /// consulted by every read.
    fn finalize(version: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0f64;

        for level in 0..(NUM_LEVELS - 1) {
            #[allow(clippy::cast_precision_loss)]
            let score = if level == 0 {
                version.files[0].len() as f64 / L0_COMPACTION_TRIGGER as f64
            } else {
                Version::total_file_size(&version.files[level]) as f64
                    / max_bytes_for_level(level)
            };

            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }

        version.compaction_level = best_level;
        version.compaction_score = best_score;
    }

    /// Picks the level and input files for the next compaction.
    ///
    /// Size-triggered compactions (score >= 1) win over seek-triggered
    /// ones; returns `None` when the tree is healthy.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = self.current();

        let size_compaction = current.compaction_score >= 1.0;
        let seek_file = current
            .file_to_compact
            .lock()
            .expect("lock is poisoned")
            .clone();

        let mut compaction = if size_compaction {
            let level = current.compaction_level;
            debug_assert!(level + 1 < NUM_LEVELS);

            let mut compaction = Compaction::new(level, self.max_file_size, Arc::clone(&current));

            // Resume after the key range compacted last time, wrapping
            // around at the end of the level
            let first_after_pointer = current.files[level].iter().find(|f| {
                self.compact_pointer[level]
                    .as_ref()
                    .map_or(true, |pointer| f.largest > *pointer)
            });

            let file = first_after_pointer.or_else(|| current.files[level].first())?;
            compaction.inputs[0].push(Arc::clone(file));

            compaction
        } else if let Some((level, file)) = seek_file {
            let mut compaction = Compaction::new(level, self.max_file_size, Arc::clone(&current));
            compaction.inputs[0].push(file);
            compaction
        } else {
            return None;
        };

        // Level-0 files may overlap each other: widen the input set to
        // every file touching the picked one's user-key range
        if compaction.level == 0 {
            let (smallest, largest) = key_range(&compaction.inputs[0]);

            compaction.inputs[0] = current.overlapping_files(
                0,
                &smallest.user_key.clone(),
                &largest.user_key.clone(),
            );
            debug_assert!(!compaction.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut compaction);

        Some(compaction)
    }

    fn setup_other_inputs(&mut self, compaction: &mut Compaction) {
        let current = self.current();
        let level = compaction.level;

        let (mut smallest, mut largest) = key_range(&compaction.inputs[0]);

        compaction.inputs[1] =
            current.overlapping_files(level + 1, &smallest.user_key, &largest.user_key);

        // The union of both input sets defines the grandparent range
        for file in &compaction.inputs[1] {
            if file.smallest < smallest {
                smallest = file.smallest.clone();
            }
            if file.largest > largest {
                largest = file.largest.clone();
            }
        }

        if level + 2 < NUM_LEVELS {
            compaction.grandparents =
                current.overlapping_files(level + 2, &smallest.user_key, &largest.user_key);
        }

        // Advance the cursor immediately rather than when the edit
        // commits: if the compaction fails, the next attempt tries a
        // different key range
        self.compact_pointer[level] = Some(largest.clone());
        compaction.edit.compact_pointers.push((level, largest));
    }
}

/// Level byte budget: 10 MiB for L1, growing 10x per level
fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1_048_576.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

fn key_range(files: &[Arc<FileMetadata>]) -> (InternalKey, InternalKey) {
    debug_assert!(!files.is_empty());

    // NOTE: Callers never pass an empty input set
    #[allow(clippy::expect_used)]
    let first = files.first().expect("input set should not be empty");

    let mut smallest = first.smallest.clone();
    let mut largest = first.largest.clone();

    for file in files.iter().skip(1) {
        if file.smallest < smallest {
            smallest = file.smallest.clone();
        }
        if file.largest > largest {
            largest = file.largest.clone();
        }
    }

    (smallest, largest)
}

/// Accumulates edits on top of a base version and produces the resulting
/// version
struct Builder {
    base: Arc<Version>,
    deleted: [HashSet<u64>; NUM_LEVELS],
    added: [BTreeMap<(InternalKey, u64), Arc<FileMetadata>>; NUM_LEVELS],
}

impl Builder {
    fn new(base: Arc<Version>) -> Self {
        Self {
            base,
            deleted: Default::default(),
            added: Default::default(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }

        for (level, file) in &edit.new_files {
            let meta = Arc::new(FileMetadata::new(
                file.number,
                file.file_size,
                file.smallest.clone(),
                file.largest.clone(),
            ));

            self.deleted[*level].remove(&file.number);
            self.added[*level].insert((meta.smallest.clone(), meta.number), meta);
        }
    }

    fn finish(self) -> Version {
        let mut version = Version::default();

        for (level, (added, deleted)) in self.added.into_iter().zip(&self.deleted).enumerate() {
            let base_files = &self.base.files[level];

            let mut files = Vec::with_capacity(base_files.len() + added.len());
            files.extend(base_files.iter().cloned());
            files.extend(added.into_values());

            files.retain(|f| !deleted.contains(&f.number));
            files.sort_by(|a, b| (&a.smallest, a.number).cmp(&(&b.smallest, b.number)));

            // Levels above 0 must stay disjoint
            if level > 0 {
                for pair in files.windows(2) {
                    debug_assert!(
                        pair[0].largest < pair[1].smallest,
                        "overlap in level {level}: #{} and #{}",
                        pair[0].number,
                        pair[1].number,
                    );
                }
            }

            version.files[level] = files;
        }

        version
    }
}
