use crate::block_cache::BlockCache;
use crate::compaction::Compaction;
use crate::config::{Config, ReadOptions};
use crate::file::{parse_file_name, FileType};
use crate::flush;
use crate::memtable::MemTable;
use crate::merge::{BoxedIterator, MergeIterator};
use crate::segment::writer::Writer as SegmentWriter;
use crate::table_cache::TableCache;
use crate::value::SeqNo;
use crate::version::edit::VersionEdit;
use crate::version::set::VersionSet;
use crate::wal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// A queued write, owned by the writers FIFO until its leader completes it
pub(crate) struct WriteRequest {
    pub id: u64,
    pub key: crate::UserKey,
    pub value: crate::UserValue,
    pub value_type: crate::ValueType,
    pub sync: bool,
}

/// Mutable engine state, guarded by the single engine mutex
pub(crate) struct DbState {
    /// Active memtable
    pub mem: Arc<MemTable>,

    /// Frozen memtable being flushed, if any
    pub imm: Option<Arc<MemTable>>,

    /// WAL of the active memtable; taken out of the state while the
    /// group-commit leader performs I/O with the mutex released
    pub wal: Option<wal::Writer>,

    /// File number of the active WAL
    pub log_number: u64,

    pub versions: VersionSet,

    /// Writers FIFO; the front request's owner is the leader
    pub writers: VecDeque<WriteRequest>,

    /// Results for completed writers, picked up by their owners
    pub write_results: HashMap<u64, crate::Result<()>>,

    pub next_writer_id: u64,

    /// First background failure; once set, the engine is read-only
    pub bg_error: Option<crate::Error>,

    /// Whether the background worker has work queued or in progress
    pub bg_work_scheduled: bool,

    /// Files being written by flush/compaction; protected from the
    /// obsolete-file sweep until their edit commits or they are abandoned
    pub pending_outputs: HashSet<u64>,
}

/// The engine core.
///
/// One mutex guards all mutable state; it is explicitly released around
/// every I/O operation (WAL append and sync, flush, compaction merge).
/// A single persistent background thread performs flushes and
/// compactions.
pub(crate) struct DbInner {
    pub config: Config,
    pub table_cache: Arc<TableCache>,
    pub block_cache: Arc<BlockCache>,

    pub state: Mutex<DbState>,

    /// Signals writers: batch completed or leadership changed
    pub writers_cv: Condvar,

    /// Wakes the background worker
    pub work_cv: Condvar,

    /// Signals that a background step finished (rotation may proceed)
    pub done_cv: Condvar,

    /// Raised by the drop of the last user handle; read outside the
    /// engine mutex so an in-flight compaction can poll it mid-merge and
    /// abort without journaling
    pub shutting_down: AtomicBool,
}

impl DbInner {
    pub fn lock_state(&self) -> MutexGuard<'_, DbState> {
        self.state.lock().expect("lock is poisoned")
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Wakes the background worker if there is work and none is queued
    pub fn maybe_schedule_compaction(&self, state: &mut DbState) {
        if state.bg_work_scheduled || self.is_shutting_down() || state.bg_error.is_some() {
            return;
        }

        let current = state.versions.current();
        let seek_pressured = current
            .file_to_compact
            .lock()
            .expect("lock is poisoned")
            .is_some();

        if state.imm.is_none() && current.compaction_score < 1.0 && !seek_pressured {
            return;
        }

        state.bg_work_scheduled = true;
        self.work_cv.notify_one();
    }

    /// Main loop of the background thread
    pub fn background_main(self: &Arc<Self>) {
        let mut state = self.lock_state();

        while !self.is_shutting_down() {
            if !state.bg_work_scheduled {
                state = self.work_cv.wait(state).expect("lock is poisoned");
                continue;
            }

            if state.bg_error.is_none() && !self.is_shutting_down() {
                state = self.background_step(state);
            }

            state.bg_work_scheduled = false;

            // The step may have produced too many files in a level,
            // or newer work may have arrived meanwhile
            self.maybe_schedule_compaction(&mut state);

            self.done_cv.notify_all();
        }

        log::debug!("Background worker shutting down");
    }

    /// One unit of background work: flush the immutable memtable if one
    /// exists, otherwise run one compaction
    fn background_step<'a>(
        self: &'a Arc<Self>,
        state: MutexGuard<'a, DbState>,
    ) -> MutexGuard<'a, DbState> {
        if state.imm.is_some() {
            return self.flush_immutable_memtable(state);
        }

        self.run_compaction(state)
    }

    /// Flushes `imm` into a level-0 segment and journals the change
    fn flush_immutable_memtable<'a>(
        self: &'a Arc<Self>,
        mut state: MutexGuard<'a, DbState>,
    ) -> MutexGuard<'a, DbState> {
        // NOTE: Caller checked imm is set
        #[allow(clippy::expect_used)]
        let imm = Arc::clone(state.imm.as_ref().expect("imm should exist"));

        let log_number = state.log_number;

        if imm.is_empty() {
            // Nothing to write; just release the old WAL
            let mut edit = VersionEdit::default();
            edit.log_number = Some(log_number);
            edit.prev_log_number = Some(0);

            match state.versions.log_and_apply(&mut edit) {
                Ok(()) => {
                    state.imm = None;
                    self.delete_obsolete_files(&mut state);
                }
                Err(e) => {
                    log::error!("Memtable release failed: {e:?}");
                    state.bg_error = Some(e);
                }
            }
            return state;
        }

        let file_number = state.versions.new_file_number();
        state.pending_outputs.insert(file_number);

        drop(state);

        let result = flush::write_memtable_to_segment(
            &self.config,
            &flush::Options {
                memtable: imm,
                file_number,
            },
        );

        let mut state = self.lock_state();
        state.pending_outputs.remove(&file_number);

        match result {
            Ok(meta) => {
                let mut edit = VersionEdit::default();
                edit.add_file(0, file_number, meta.file_size, meta.smallest, meta.largest);
                edit.log_number = Some(log_number);
                edit.prev_log_number = Some(0);

                match state.versions.log_and_apply(&mut edit) {
                    Ok(()) => {
                        state.imm = None;
                        self.delete_obsolete_files(&mut state);
                    }
                    Err(e) => {
                        log::error!("Flush journaling failed: {e:?}");
                        state.bg_error = Some(e);
                    }
                }
            }
            Err(e) => {
                // The immutable memtable stays in place; a flush failure
                // is fatal until reopen
                log::error!("Flush failed: {e:?}");
                state.versions.reuse_file_number(file_number);
                state.bg_error = Some(e);
            }
        }

        state
    }

    /// Picks and executes one compaction, if any is due
    fn run_compaction<'a>(
        self: &'a Arc<Self>,
        mut state: MutexGuard<'a, DbState>,
    ) -> MutexGuard<'a, DbState> {
        let Some(mut compaction) = state.versions.pick_compaction() else {
            return state;
        };

        if compaction.is_trivial_move() {
            // Move the single input file down one level without rewriting
            // NOTE: is_trivial_move implies exactly one input
            #[allow(clippy::expect_used)]
            let file = compaction.inputs[0].first().expect("should have one input");

            log::debug!(
                "Trivial move of segment {} to level {}",
                file.number,
                compaction.level + 1
            );

            compaction.edit.delete_file(compaction.level, file.number);
            compaction.edit.add_file(
                compaction.level + 1,
                file.number,
                file.file_size,
                file.smallest.clone(),
                file.largest.clone(),
            );

            let mut edit = std::mem::take(&mut compaction.edit);
            if let Err(e) = state.versions.log_and_apply(&mut edit) {
                log::error!("Trivial move failed: {e:?}");
                state.bg_error = Some(e);
            }

            return state;
        }

        let (mut state, result) = self.do_compaction_work(state, &mut compaction);

        match result {
            Ok(()) => {
                for input_level in &compaction.inputs {
                    for file in input_level {
                        self.table_cache.evict(file.number);
                    }
                }

                self.delete_obsolete_files(&mut state);
            }
            Err(e) => {
                if self.is_shutting_down() {
                    log::debug!("Compaction aborted by shutdown");
                } else {
                    log::error!("Compaction failed: {e:?}");
                    state.bg_error = Some(e);
                }
            }
        }

        state
    }

    /// Merges the compaction inputs into fresh L+1 output files.
    ///
    /// Runs with the engine mutex released; reacquires it only to
    /// allocate output file numbers and finally to journal the edit.
    fn do_compaction_work<'a>(
        self: &'a Arc<Self>,
        state: MutexGuard<'a, DbState>,
        compaction: &mut Compaction,
    ) -> (MutexGuard<'a, DbState>, crate::Result<()>) {
        log::debug!(
            "Compacting {} files from level {} with {} files from level {}",
            compaction.inputs[0].len(),
            compaction.level,
            compaction.inputs[1].len(),
            compaction.level + 1,
        );

        // All writes up to here are shadowable; the main thread may be
        // advancing the live counter concurrently, so take a snapshot
        let smallest_snapshot = state.versions.last_sequence();

        compaction.add_input_deletions();

        drop(state);

        let mut allocated = Vec::new();
        let result = self.merge_compaction_inputs(compaction, smallest_snapshot, &mut allocated);

        let mut state = self.lock_state();

        for number in allocated {
            state.pending_outputs.remove(&number);
        }

        if let Err(e) = result {
            return (state, Err(e));
        }

        let mut edit = std::mem::take(&mut compaction.edit);
        let status = state.versions.log_and_apply(&mut edit);

        (state, status)
    }

    /// The unlocked part of compaction: n-way merge, drop rules, output
    /// rotation. Returns the finished outputs, already recorded in the
    /// compaction's edit.
    fn merge_compaction_inputs(
        self: &Arc<Self>,
        compaction: &mut Compaction,
        smallest_snapshot: SeqNo,
        allocated: &mut Vec<u64>,
    ) -> crate::Result<()> {
        let read_opts = ReadOptions {
            verify_checksums: self.config.paranoid_checks,
            fill_cache: false,
        };

        let mut iters: Vec<BoxedIterator<'_>> = Vec::new();
        for input_level in &compaction.inputs {
            for file in input_level {
                iters.push(Box::new(self.table_cache.iter(
                    file.number,
                    file.file_size,
                    read_opts.clone(),
                    (std::ops::Bound::Unbounded, std::ops::Bound::Unbounded),
                )?));
            }
        }

        let merged = MergeIterator::new(iters);

        let mut builder: Option<(u64, SegmentWriter)> = None;
        let mut output_count = 0usize;
        let output_level = compaction.level + 1;

        let mut current_user_key: Option<crate::UserKey> = None;
        let mut last_sequence_for_key = SeqNo::MAX;

        let seal = |builder: &mut Option<(u64, SegmentWriter)>,
                    edit: &mut VersionEdit|
         -> crate::Result<()> {
            if let Some((number, writer)) = builder.take() {
                let meta = writer.finish()?;
                edit.add_file(
                    output_level,
                    number,
                    meta.file_size,
                    meta.smallest,
                    meta.largest,
                );
            }
            Ok(())
        };

        let abandon = |builder: Option<(u64, SegmentWriter)>| {
            if let Some((_, writer)) = builder {
                writer.abandon();
            }
        };

        for entry in merged {
            if self.is_shutting_down() {
                abandon(builder);
                return Err(crate::Error::Io(std::io::Error::other(
                    "deleting DB during compaction",
                )));
            }

            let (key, value) = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    abandon(builder);
                    return Err(e);
                }
            };

            // Grandparent overlap forces an output rotation so future
            // compactions of the next level stay bounded
            if compaction.should_stop_before(&key) && builder.is_some() {
                seal(&mut builder, &mut compaction.edit)?;
                output_count += 1;
            }

            let mut drop_entry = false;

            if current_user_key.as_deref() != Some(&*key.user_key) {
                current_user_key = Some(key.user_key.clone());
                last_sequence_for_key = SeqNo::MAX;
            }

            if last_sequence_for_key <= smallest_snapshot {
                // A newer version of this user key was already emitted
                drop_entry = true;
            } else if key.is_tombstone()
                && key.seqno <= smallest_snapshot
                && compaction.is_base_level_for_key(&key.user_key)
            {
                // No deeper level can hold this key by range. The output
                // level's own input files may still hold a value for it,
                // so the tombstone may only go if every one of their
                // bloom filters rules the key out; false positives just
                // keep the tombstone alive.
                let mut maybe_in_output = false;

                for file in &compaction.inputs[1] {
                    if self
                        .table_cache
                        .may_contain(file.number, file.file_size, &key.user_key)
                        .unwrap_or(true)
                    {
                        maybe_in_output = true;
                        break;
                    }
                }

                drop_entry = !maybe_in_output;
            }

            last_sequence_for_key = key.seqno;

            if drop_entry {
                continue;
            }

            if builder.is_none() {
                let number = self.allocate_output_file();
                allocated.push(number);

                match SegmentWriter::new(flush::writer_options(&self.config, number)) {
                    Ok(writer) => builder = Some((number, writer)),
                    Err(e) => return Err(e),
                }
            }

            // NOTE: Just ensured above
            #[allow(clippy::expect_used)]
            let (_, writer) = builder.as_mut().expect("builder should exist");

            if let Err(e) = writer.add(&key, &value) {
                abandon(builder);
                return Err(e);
            }

            if writer.file_size() >= compaction.max_output_file_size {
                seal(&mut builder, &mut compaction.edit)?;
                output_count += 1;
            }
        }

        if builder.is_some() {
            seal(&mut builder, &mut compaction.edit)?;
            output_count += 1;
        }

        log::debug!("Compaction produced {output_count} files at level {output_level}");

        Ok(())
    }

    fn allocate_output_file(&self) -> u64 {
        let mut state = self.lock_state();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        number
    }

    /// Unlinks every file in the folder that no live state references
    pub fn delete_obsolete_files(&self, state: &mut DbState) {
        if state.bg_error.is_some() {
            // After a background error the journaled state is suspect;
            // keep everything
            return;
        }

        let mut live = state.versions.live_files();
        live.extend(&state.pending_outputs);

        let log_number = state.versions.log_number();
        let prev_log_number = state.versions.prev_log_number();
        let manifest_number = state.versions.manifest_file_number();

        let Ok(dir) = std::fs::read_dir(&self.config.path) else {
            return;
        };

        for entry in dir.flatten() {
            let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                continue;
            };

            let keep = match parse_file_name(&name) {
                Some(FileType::Log(number)) => {
                    number >= log_number || (prev_log_number != 0 && number == prev_log_number)
                }
                Some(FileType::Manifest(number)) => number >= manifest_number,
                Some(FileType::Table(number)) => live.contains(&number),
                Some(FileType::Current) => true,
                // Not engine-owned, leave alone
                None => true,
            };

            if keep {
                continue;
            }

            if let Some(FileType::Table(number)) = parse_file_name(&name) {
                self.table_cache.evict(number);
            }

            log::debug!("Deleting obsolete file {name}");
            if let Err(e) = std::fs::remove_file(entry.path()) {
                log::warn!("Failed to delete {name}: {e}");
            }
        }
    }

    /// Signals shutdown and joins the background worker; called by the
    /// last user handle on drop
    pub fn shutdown_and_join(&self, handle: Option<std::thread::JoinHandle<()>>) {
        self.shutting_down.store(true, Ordering::Release);

        {
            let _state = self.lock_state();
            self.work_cv.notify_all();
        }

        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Background worker panicked");
            }
        }

        // An in-flight step observed the signal and aborted; give any
        // lingering waiters a chance to observe final state
        let mut state = self.lock_state();
        while state.bg_work_scheduled {
            let (guard, timeout) = self
                .done_cv
                .wait_timeout(state, Duration::from_millis(100))
                .expect("lock is poisoned");
            state = guard;
            if timeout.timed_out() {
                break;
            }
        }
    }
}
