use crate::config::Config;
use crate::file::table_file_path;
use crate::memtable::MemTable;
use crate::segment::writer::{FinishedSegment, Options as WriterOptions, Writer};
use std::sync::Arc;

/// Flush options
pub struct Options {
    /// Memtable to flush
    pub memtable: Arc<MemTable>,

    /// Number of the segment file to create
    pub file_number: u64,
}

/// Serializes a frozen memtable into a fresh level-0 segment file.
///
/// Called by the background worker with the engine mutex released; only
/// the resulting metadata re-enters the critical section.
pub fn write_memtable_to_segment(
    config: &Config,
    opts: &Options,
) -> crate::Result<FinishedSegment> {
    let path = table_file_path(&config.path, opts.file_number);
    log::debug!("Flushing memtable to {}", path.display());

    let mut writer = Writer::new(writer_options(config, opts.file_number))?;

    for (key, value) in opts.memtable.iter() {
        writer.add(&key, &value)?;
    }

    let finished = match writer.finish() {
        Ok(finished) => finished,
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
    };

    log::debug!(
        "Flushed segment {} ({} entries, {} bytes)",
        opts.file_number,
        finished.num_entries,
        finished.file_size,
    );

    Ok(finished)
}

/// Writer configuration for a new segment file, shared by flush and
/// compaction
pub(crate) fn writer_options(config: &Config, file_number: u64) -> WriterOptions {
    WriterOptions {
        path: table_file_path(&config.path, file_number),
        block_size: config.block_size,
        block_restart_interval: config.block_restart_interval,
        compression: config.compression,
        bloom_bits_per_key: config.bloom_bits_per_key,
    }
}
