//! Prefix-compressed block encoding.
//!
//! Within a block, each entry drops the key prefix it shares with the
//! previous entry:
//!
//! ```text
//! varint32 shared | varint32 non_shared | varint32 value_len | key_tail | value
//! ```
//!
//! Every `restart_interval` entries, an entry is written with `shared = 0`
//! (a restart point). The block tail lists all restart offsets as fixed32
//! values, followed by the fixed32 restart count.

use crate::coding::{read_varint32, write_varint32};
use crate::value::{InternalKey, UserValue};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Cursor;

/// Builds the wire form of a single block (data, index or metaindex)
pub struct Builder {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    last_key: Vec<u8>,
}

impl Builder {
    pub fn new(restart_interval: usize) -> Self {
        debug_assert!(restart_interval >= 1);

        Self {
            buf: Vec::with_capacity(4_096),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Uncompressed size the block would have if finished now
    pub fn size_estimate(&self) -> usize {
        self.buf.len() + (self.restarts.len() + 1) * std::mem::size_of::<u32>()
    }

    /// Appends an entry.
    ///
    /// Keys must be added in strictly increasing order; the builder only
    /// sees their encoded form, so the ordering is the caller's contract.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < self.restart_interval {
            common_prefix_len(&self.last_key, key)
        } else {
            // NOTE: Block offsets are bounded far below u32::MAX
            #[allow(clippy::cast_possible_truncation)]
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        };

        let non_shared = key.len() - shared;

        // NOTE: Key and value sizes are bounded far below u32::MAX
        #[allow(clippy::cast_possible_truncation, clippy::expect_used)]
        {
            write_varint32(&mut self.buf, shared as u32).expect("vec write should succeed");
            write_varint32(&mut self.buf, non_shared as u32).expect("vec write should succeed");
            write_varint32(&mut self.buf, value.len() as u32).expect("vec write should succeed");
        }

        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.counter += 1;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
    }

    /// Appends the restart array and returns the finished block contents
    pub fn finish(mut self) -> Vec<u8> {
        for restart in &self.restarts {
            // NOTE: Writing into a Vec cannot fail
            #[allow(clippy::expect_used)]
            self.buf
                .write_u32::<LittleEndian>(*restart)
                .expect("vec write should succeed");
        }

        // NOTE: Restart count is bounded by entry count
        #[allow(clippy::cast_possible_truncation, clippy::expect_used)]
        self.buf
            .write_u32::<LittleEndian>(self.restarts.len() as u32)
            .expect("vec write should succeed");

        self.buf
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Decodes a block into its raw `(key, value)` entries
pub fn parse_entries(data: &[u8]) -> crate::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let corrupt = || crate::Error::Corruption("malformed block".to_string());

    if data.len() < std::mem::size_of::<u32>() {
        return Err(corrupt());
    }

    let restart_count =
        u32::from_le_bytes(data[data.len() - 4..].try_into().map_err(|_| corrupt())?) as usize;

    let restart_array_size = (restart_count + 1) * std::mem::size_of::<u32>();
    let entries_end = data.len().checked_sub(restart_array_size).ok_or_else(corrupt)?;

    let mut entries = Vec::new();
    let mut last_key: Vec<u8> = Vec::new();

    let mut cursor = Cursor::new(&data[..entries_end]);

    while (cursor.position() as usize) < entries_end {
        let shared = read_varint32(&mut cursor).map_err(|_| corrupt())? as usize;
        let non_shared = read_varint32(&mut cursor).map_err(|_| corrupt())? as usize;
        let value_len = read_varint32(&mut cursor).map_err(|_| corrupt())? as usize;

        if shared > last_key.len() {
            return Err(corrupt());
        }

        let pos = cursor.position() as usize;
        let tail_end = pos.checked_add(non_shared).ok_or_else(corrupt)?;
        let value_end = tail_end.checked_add(value_len).ok_or_else(corrupt)?;

        if value_end > entries_end {
            return Err(corrupt());
        }

        let mut key = Vec::with_capacity(shared + non_shared);
        key.extend_from_slice(&last_key[..shared]);
        key.extend_from_slice(&data[pos..tail_end]);

        let value = data[tail_end..value_end].to_vec();

        cursor.set_position(value_end as u64);

        last_key.clone_from(&key);
        entries.push((key, value));
    }

    Ok(entries)
}

/// A decoded data block, held in the block cache and iterated by the
/// two-level segment iterator
pub struct DataBlock {
    /// Entries in ascending internal-key order
    pub entries: Vec<(InternalKey, UserValue)>,
}

impl DataBlock {
    /// Decodes a data block; entry keys must be valid internal keys.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the block or any key is malformed.
    pub fn parse(data: &[u8]) -> crate::Result<Self> {
        let entries = parse_entries(data)?
            .into_iter()
            .map(|(key, value)| {
                InternalKey::decode(&key)
                    .map(|ikey| (ikey, UserValue::from(value)))
                    .ok_or_else(|| crate::Error::Corruption("malformed internal key".to_string()))
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Index of the first entry with key `>= target`
    pub fn seek(&self, target: &InternalKey) -> usize {
        self.entries.partition_point(|(key, _)| key < target)
    }

    /// Approximate in-memory size, used as the cache charge
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .entries
                .iter()
                .map(|(key, value)| key.encoded_len() + value.len())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;
    use test_log::test;

    #[test]
    fn roundtrip_with_restarts() -> crate::Result<()> {
        let keys = (0..100).map(|i| format!("key{i:03}")).collect::<Vec<_>>();

        let mut builder = Builder::new(16);
        for key in &keys {
            builder.add(key.as_bytes(), b"value");
        }

        let block = builder.finish();
        let entries = parse_entries(&block)?;

        assert_eq!(keys.len(), entries.len());
        for (key, (parsed_key, parsed_value)) in keys.iter().zip(&entries) {
            assert_eq!(key.as_bytes(), parsed_key.as_slice());
            assert_eq!(b"value", parsed_value.as_slice());
        }

        Ok(())
    }

    #[test]
    fn prefix_compression_shrinks_encoding() {
        let mut compressed = Builder::new(16);
        let mut uncompressed = Builder::new(1);

        for i in 0..64 {
            let key = format!("aaaaaaaaaaaaaaaa{i:03}");
            compressed.add(key.as_bytes(), b"v");
            uncompressed.add(key.as_bytes(), b"v");
        }

        assert!(compressed.finish().len() < uncompressed.finish().len());
    }

    #[test]
    fn restart_interval_one() -> crate::Result<()> {
        let mut builder = Builder::new(1);
        builder.add(b"alpha", b"1");
        builder.add(b"beta", b"2");
        builder.add(b"gamma", b"3");

        let entries = parse_entries(&builder.finish())?;
        assert_eq!(3, entries.len());
        assert_eq!(b"beta", entries[1].0.as_slice());

        Ok(())
    }

    #[test]
    fn empty_keys_and_values() -> crate::Result<()> {
        let mut builder = Builder::new(16);
        builder.add(b"", b"");
        builder.add(b"a", b"");

        let entries = parse_entries(&builder.finish())?;
        assert_eq!(2, entries.len());
        assert!(entries[0].0.is_empty());
        assert!(entries[0].1.is_empty());

        Ok(())
    }

    #[test]
    fn garbage_is_corruption() {
        assert!(parse_entries(&[1, 2]).is_err());
        assert!(parse_entries(&[0xff; 32]).is_err());
    }

    #[test]
    fn data_block_seek() -> crate::Result<()> {
        let mut builder = Builder::new(4);

        let mut keys = vec![];
        for i in (0..50).step_by(2) {
            let key = InternalKey::new(format!("k{i:02}").into_bytes(), 9, ValueType::Value);
            builder.add(&key.encode(), b"v");
            keys.push(key);
        }

        let block = DataBlock::parse(&builder.finish())?;
        assert_eq!(25, block.entries.len());

        // Exact hit
        let target = InternalKey::new(*b"k10", 9, ValueType::Value);
        let idx = block.seek(&target);
        assert_eq!(target, block.entries[idx].0);

        // Between two keys: lands on the next one
        let target = InternalKey::new(*b"k11", 9, ValueType::Value);
        let idx = block.seek(&target);
        assert_eq!(b"k12", &*block.entries[idx].0.user_key);

        // Same user key, higher seqno sorts first: seeking at a lower seqno
        // must not go back to the newer entry
        let target = InternalKey::new(*b"k10", 3, ValueType::Value);
        let idx = block.seek(&target);
        assert_eq!(b"k12", &*block.entries[idx].0.user_key);

        // Past the end
        let target = InternalKey::new(*b"zzz", 9, ValueType::Value);
        assert_eq!(block.entries.len(), block.seek(&target));

        Ok(())
    }
}
