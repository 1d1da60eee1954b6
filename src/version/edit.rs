use crate::coding::{
    read_length_prefixed, read_varint32, read_varint64, write_length_prefixed, write_varint32,
    write_varint64,
};
use crate::serde::{Serializable, SerializeError};
use crate::value::{InternalKey, SeqNo};
use crate::version::NUM_LEVELS;
use std::collections::BTreeSet;
use std::io::{Cursor, Write};

// Manifest record tags
const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A file added by an edit
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewFile {
    /// Segment file number
    pub number: u64,

    /// File size in bytes
    pub file_size: u64,

    /// Smallest internal key in the file
    pub smallest: InternalKey,

    /// Largest internal key in the file
    pub largest: InternalKey,
}

/// A delta between two versions, serialized into the manifest.
///
/// Applying all historical edits in order reconstructs the current
/// version exactly.
#[derive(Debug, Default)]
pub struct VersionEdit {
    /// Name of the user-key comparator; only present in snapshot edits
    pub comparator_name: Option<String>,

    /// WAL number of the active memtable
    pub log_number: Option<u64>,

    /// WAL number of the immutable memtable being flushed, 0 if none
    pub prev_log_number: Option<u64>,

    /// File-number counter floor
    pub next_file_number: Option<u64>,

    /// Last applied sequence number
    pub last_sequence: Option<SeqNo>,

    /// Per-level rotating compaction cursors
    pub compact_pointers: Vec<(usize, InternalKey)>,

    /// Files removed, as `(level, file_number)`
    pub deleted_files: BTreeSet<(usize, u64)>,

    /// Files added, as `(level, file)`
    pub new_files: Vec<(usize, NewFile)>,
}

impl VersionEdit {
    /// Records a file addition
    pub fn add_file(
        &mut self,
        level: usize,
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
    ) {
        debug_assert!(level < NUM_LEVELS);

        self.new_files.push((
            level,
            NewFile {
                number,
                file_size,
                smallest,
                largest,
            },
        ));
    }

    /// Records a file deletion
    pub fn delete_file(&mut self, level: usize, number: u64) {
        debug_assert!(level < NUM_LEVELS);

        self.deleted_files.insert((level, number));
    }

    /// Encodes into a fresh manifest record payload
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);

        // NOTE: Writing into a Vec cannot fail
        #[allow(clippy::expect_used)]
        self.serialize(&mut buf).expect("vec write should succeed");

        buf
    }

    /// Decodes a manifest record payload.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the record is malformed or carries an unknown
    /// tag.
    pub fn decode(payload: &[u8]) -> crate::Result<Self> {
        let corrupt = |what: &str| crate::Error::Corruption(format!("VersionEdit: {what}"));

        let mut edit = Self::default();
        let mut cursor = Cursor::new(payload);

        while (cursor.position() as usize) < payload.len() {
            let tag = read_varint32(&mut cursor).map_err(|_| corrupt("tag"))?;

            match tag {
                TAG_COMPARATOR => {
                    let name =
                        read_length_prefixed(&mut cursor).map_err(|_| corrupt("comparator name"))?;
                    let name =
                        String::from_utf8(name).map_err(|_| corrupt("comparator name"))?;
                    edit.comparator_name = Some(name);
                }

                TAG_LOG_NUMBER => {
                    edit.log_number =
                        Some(read_varint64(&mut cursor).map_err(|_| corrupt("log number"))?);
                }

                TAG_PREV_LOG_NUMBER => {
                    edit.prev_log_number = Some(
                        read_varint64(&mut cursor).map_err(|_| corrupt("previous log number"))?,
                    );
                }

                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number =
                        Some(read_varint64(&mut cursor).map_err(|_| corrupt("next file number"))?);
                }

                TAG_LAST_SEQUENCE => {
                    edit.last_sequence =
                        Some(read_varint64(&mut cursor).map_err(|_| corrupt("last sequence"))?);
                }

                TAG_COMPACT_POINTER => {
                    let level = read_level(&mut cursor).map_err(|_| corrupt("compact pointer"))?;
                    let key = read_internal_key(&mut cursor)
                        .ok_or_else(|| corrupt("compact pointer"))?;
                    edit.compact_pointers.push((level, key));
                }

                TAG_DELETED_FILE => {
                    let level = read_level(&mut cursor).map_err(|_| corrupt("deleted file"))?;
                    let number =
                        read_varint64(&mut cursor).map_err(|_| corrupt("deleted file"))?;
                    edit.deleted_files.insert((level, number));
                }

                TAG_NEW_FILE => {
                    let level = read_level(&mut cursor).map_err(|_| corrupt("new file"))?;
                    let number = read_varint64(&mut cursor).map_err(|_| corrupt("new file"))?;
                    let file_size = read_varint64(&mut cursor).map_err(|_| corrupt("new file"))?;
                    let smallest =
                        read_internal_key(&mut cursor).ok_or_else(|| corrupt("new file"))?;
                    let largest =
                        read_internal_key(&mut cursor).ok_or_else(|| corrupt("new file"))?;

                    edit.new_files.push((
                        level,
                        NewFile {
                            number,
                            file_size,
                            smallest,
                            largest,
                        },
                    ));
                }

                other => return Err(corrupt(&format!("unknown tag {other}"))),
            }
        }

        Ok(edit)
    }
}

impl Serializable for VersionEdit {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        if let Some(name) = &self.comparator_name {
            write_varint32(writer, TAG_COMPARATOR)?;
            write_length_prefixed(writer, name.as_bytes())?;
        }

        if let Some(n) = self.log_number {
            write_varint32(writer, TAG_LOG_NUMBER)?;
            write_varint64(writer, n)?;
        }

        if let Some(n) = self.prev_log_number {
            write_varint32(writer, TAG_PREV_LOG_NUMBER)?;
            write_varint64(writer, n)?;
        }

        if let Some(n) = self.next_file_number {
            write_varint32(writer, TAG_NEXT_FILE_NUMBER)?;
            write_varint64(writer, n)?;
        }

        if let Some(n) = self.last_sequence {
            write_varint32(writer, TAG_LAST_SEQUENCE)?;
            write_varint64(writer, n)?;
        }

        for (level, key) in &self.compact_pointers {
            write_varint32(writer, TAG_COMPACT_POINTER)?;

            #[allow(clippy::cast_possible_truncation)]
            write_varint32(writer, *level as u32)?;
            write_length_prefixed(writer, &key.encode())?;
        }

        for (level, number) in &self.deleted_files {
            write_varint32(writer, TAG_DELETED_FILE)?;

            #[allow(clippy::cast_possible_truncation)]
            write_varint32(writer, *level as u32)?;
            write_varint64(writer, *number)?;
        }

        for (level, file) in &self.new_files {
            write_varint32(writer, TAG_NEW_FILE)?;

            #[allow(clippy::cast_possible_truncation)]
            write_varint32(writer, *level as u32)?;
            write_varint64(writer, file.number)?;
            write_varint64(writer, file.file_size)?;
            write_length_prefixed(writer, &file.smallest.encode())?;
            write_length_prefixed(writer, &file.largest.encode())?;
        }

        Ok(())
    }
}

fn read_level(cursor: &mut Cursor<&[u8]>) -> std::io::Result<usize> {
    let level = read_varint32(cursor)? as usize;

    if level < NUM_LEVELS {
        Ok(level)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "level out of range",
        ))
    }
}

fn read_internal_key(cursor: &mut Cursor<&[u8]>) -> Option<InternalKey> {
    let bytes = read_length_prefixed(cursor).ok()?;
    InternalKey::decode(&bytes)
}
