//! Group commit.
//!
//! Writers enqueue onto a FIFO under the engine mutex. The writer at the
//! head is the leader: it assembles a batch out of the queued writers,
//! serializes it into a single WAL record, syncs if any member asked for
//! durability, applies every entry to the memtable, and completes the
//! followers in enqueue order. Followers block until their result is
//! posted or they are promoted to leader.

use super::inner::{DbInner, DbState, WriteRequest};
use crate::coding::write_length_prefixed;
use crate::config::WriteOptions;
use crate::value::{InternalKey, SeqNo, UserKey, UserValue, ValueType};
use std::sync::MutexGuard;

/// Upper bound on the summed key+value payload of one batch
const MAX_BATCH_BYTES: usize = 1 << 20;

/// `fixed32` entry count prefix of a batch record
const BATCH_HEADER_SIZE: usize = 4;

/// Per-entry fixed cost: fixed64 sequence + type byte
const ENTRY_FIXED_SIZE: usize = 9;

impl DbInner {
    /// Serialized size of one batch entry
    fn entry_encoded_size(key: &[u8], value: &[u8]) -> usize {
        ENTRY_FIXED_SIZE + varint_len(key.len()) + key.len() + varint_len(value.len()) + value.len()
    }

    /// Enqueues one write and blocks until it is durable per `opts`.
    pub(crate) fn write(
        &self,
        key: UserKey,
        value: UserValue,
        value_type: ValueType,
        opts: WriteOptions,
    ) -> crate::Result<()> {
        // A write must fit into a single WAL record together with the
        // batch header; rejecting it up front keeps the engine writable
        if BATCH_HEADER_SIZE + Self::entry_encoded_size(&key, &value) > crate::wal::MAX_RECORD_SIZE
        {
            return Err(crate::Error::InvalidArgument(
                "key/value pair exceeds the WAL record capacity".to_string(),
            ));
        }

        let mut state = self.lock_state();

        let id = state.next_writer_id;
        state.next_writer_id += 1;

        state.writers.push_back(WriteRequest {
            id,
            key,
            value,
            value_type,
            sync: opts.sync,
        });

        loop {
            if let Some(result) = state.write_results.remove(&id) {
                return result;
            }

            let head = state.writers.front().map(|w| w.id);
            if head == Some(id) {
                break;
            }

            state = self.writers_cv.wait(state).expect("lock is poisoned");
        }

        // This writer is now the leader
        let (mut state, status) = self.write_as_leader(state, id);

        // Promote the next leader, if any writer is still queued
        if !state.writers.is_empty() {
            self.writers_cv.notify_all();
        }

        drop(state);
        status
    }

    /// Runs the whole group commit on behalf of the queue head.
    ///
    /// The engine mutex is released during the WAL append/sync and the
    /// memtable application; the leader's request stays at the queue
    /// head meanwhile, so no second leader can start.
    fn write_as_leader<'a>(
        &'a self,
        state: MutexGuard<'a, DbState>,
        leader_id: u64,
    ) -> (MutexGuard<'a, DbState>, crate::Result<()>) {
        let (mut state, room) = self.make_room_for_write(state, false);

        if let Err(e) = room {
            // Only the leader itself fails; followers get a fresh chance
            state.writers.pop_front();
            self.writers_cv.notify_all();
            return (state, Err(e));
        }

        let (batch_len, need_sync) = Self::build_batch_group(&state);
        debug_assert!(batch_len >= 1);

        let base_sequence = state.versions.last_sequence();
        let record = Self::encode_batch(&state, batch_len, base_sequence);

        // NOTE: make_room_for_write installed a WAL
        #[allow(clippy::expect_used)]
        let mut wal = state.wal.take().expect("wal should be open");
        let mem = std::sync::Arc::clone(&state.mem);

        drop(state);

        // I/O happens with the mutex released; concurrent writers only
        // enqueue behind the leader
        let mut status = wal.add_record(&record);
        if status.is_ok() && need_sync {
            status = wal.sync();
        }

        match status {
            Ok(()) => {
                let mut state = self.lock_state();

                let mut sequence = base_sequence;
                for request in state.writers.iter().take(batch_len) {
                    sequence += 1;
                    mem.insert(
                        InternalKey::new(
                            std::sync::Arc::clone(&request.key),
                            sequence,
                            request.value_type,
                        ),
                        std::sync::Arc::clone(&request.value),
                    );
                }

                state.wal = Some(wal);
                state
                    .versions
                    .set_last_sequence(base_sequence + batch_len as SeqNo);

                let status = Self::complete_batch(&mut state, leader_id, batch_len, &Ok(()));
                self.writers_cv.notify_all();
                (state, status)
            }
            Err(error) => {
                let mut state = self.lock_state();
                state.wal = Some(wal);

                // A WAL failure poisons the engine: later writes must not
                // reuse sequence numbers that may be partially persisted
                state.bg_error = Some(error.duplicate());

                let status = Self::complete_batch(&mut state, leader_id, batch_len, &Err(error));
                self.writers_cv.notify_all();
                (state, status)
            }
        }
    }

    /// Determines how many queued writers fit into this batch
    fn build_batch_group(state: &DbState) -> (usize, bool) {
        let mut payload = 0usize;
        let mut record_size = BATCH_HEADER_SIZE;
        let mut need_sync = false;
        let mut batch_len = 0usize;

        for (idx, request) in state.writers.iter().enumerate() {
            let entry_payload = request.key.len() + request.value.len();
            let entry_size = Self::entry_encoded_size(&request.key, &request.value);

            if idx > 0
                && (payload + entry_payload > MAX_BATCH_BYTES
                    || record_size + entry_size > crate::wal::MAX_RECORD_SIZE)
            {
                break;
            }

            payload += entry_payload;
            record_size += entry_size;
            need_sync |= request.sync;
            batch_len = idx + 1;
        }

        (batch_len, need_sync)
    }

    /// Serializes the batch into one WAL record:
    /// `fixed32 count || { fixed64 sequence | u8 type | lp key | lp value } x count`
    fn encode_batch(state: &DbState, batch_len: usize, base_sequence: SeqNo) -> Vec<u8> {
        use byteorder::{LittleEndian, WriteBytesExt};

        let mut record = Vec::with_capacity(256);

        // NOTE: Bounded by the frame size check during batch assembly
        #[allow(clippy::cast_possible_truncation, clippy::expect_used)]
        record
            .write_u32::<LittleEndian>(batch_len as u32)
            .expect("vec write should succeed");

        let mut sequence = base_sequence;

        #[allow(clippy::expect_used)]
        for request in state.writers.iter().take(batch_len) {
            sequence += 1;

            record
                .write_u64::<LittleEndian>(sequence)
                .expect("vec write should succeed");
            record
                .write_u8(u8::from(request.value_type))
                .expect("vec write should succeed");
            write_length_prefixed(&mut record, &request.key).expect("vec write should succeed");
            write_length_prefixed(&mut record, &request.value).expect("vec write should succeed");
        }

        record
    }

    /// Pops the batch off the queue, posting each follower's result in
    /// enqueue order; returns the leader's own status
    fn complete_batch(
        state: &mut DbState,
        leader_id: u64,
        batch_len: usize,
        status: &crate::Result<()>,
    ) -> crate::Result<()> {
        let mut own_status = Ok(());

        for _ in 0..batch_len {
            // NOTE: The batch was built from the queue, entries exist
            #[allow(clippy::expect_used)]
            let request = state.writers.pop_front().expect("batch member should exist");

            let result = match status {
                Ok(()) => Ok(()),
                Err(e) => Err(e.duplicate()),
            };

            if request.id == leader_id {
                own_status = result;
            } else {
                state.write_results.insert(request.id, result);
            }
        }

        own_status
    }

    /// Ensures the active memtable has room, rotating it if needed.
    ///
    /// May release and reacquire the mutex while throttling or waiting
    /// for the background worker.
    fn make_room_for_write<'a>(
        &'a self,
        state: MutexGuard<'a, DbState>,
        force: bool,
    ) -> (MutexGuard<'a, DbState>, crate::Result<()>) {
        let mut state = state;
        let mut force = force;
        let mut allow_delay = !force;

        loop {
            if let Some(e) = state.bg_error.as_ref().map(|e| e.duplicate()) {
                return (state, Err(e));
            }

            if allow_delay
                && state.versions.num_level_files(0)
                    >= crate::version::L0_SLOWDOWN_WRITES_TRIGGER
            {
                // Getting close to the L0 stop limit: give the compactor
                // one millisecond of air instead of stalling a writer for
                // seconds once the limit is hit
                drop(state);
                std::thread::sleep(std::time::Duration::from_millis(1));
                allow_delay = false;
                state = self.lock_state();
                continue;
            }

            if !force && state.mem.approximate_size() <= self.config.write_buffer_size {
                return (state, Ok(()));
            }

            if state.imm.is_some() {
                // The previous memtable is still being flushed
                log::trace!("Waiting for immutable memtable flush...");
                state = self.done_cv.wait(state).expect("lock is poisoned");
                continue;
            }

            if state.versions.num_level_files(0) >= crate::version::L0_STOP_WRITES_TRIGGER {
                log::trace!("Too many level-0 files, stalling writes...");
                state = self.done_cv.wait(state).expect("lock is poisoned");
                continue;
            }

            // Rotate: fresh WAL + fresh memtable, freeze the current one
            let new_log_number = state.versions.new_file_number();
            let path = crate::file::log_file_path(&self.config.path, new_log_number);

            match crate::wal::Writer::create(&path) {
                Ok(wal) => {
                    state.wal = Some(wal);
                    state.log_number = new_log_number;
                    state.imm = Some(std::mem::replace(
                        &mut state.mem,
                        std::sync::Arc::new(crate::memtable::MemTable::default()),
                    ));
                    force = false;

                    log::debug!("Rotated memtable, new WAL {new_log_number}");
                    self.maybe_schedule_compaction(&mut state);
                }
                Err(e) => {
                    // Let a later attempt re-use the file number
                    state.versions.reuse_file_number(new_log_number);
                    return (state, Err(e));
                }
            }
        }
    }
}

fn varint_len(mut value: usize) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}
