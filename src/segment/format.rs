//! On-disk primitives of the segment file format: block handles, the
//! footer, compression types and raw block I/O.
//!
//! ```text
//! data_block_0 | .. | data_block_N | bloom_block | metaindex_block | index_block | footer
//! ```
//!
//! Every block is followed by a 5-byte trailer: 1 compression type byte,
//! then the masked CRC-32C of (block bytes || type byte).

use crate::checksum;
use crate::coding::{read_varint64, write_varint64};
use crate::serde::{Deserializable, DeserializeError, Serializable, SerializeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

/// Magic number at the very end of every segment file
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// 1 compression type byte + 4 CRC bytes
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Maximum encoded length of a block handle (two varint64)
pub const MAX_BLOCK_HANDLE_SIZE: usize = 20;

/// Exact encoded length of the footer
pub const FOOTER_SIZE: usize = 2 * MAX_BLOCK_HANDLE_SIZE + 8;

/// Block compression type, stored in the block trailer
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CompressionType {
    /// Blocks are stored as-is
    #[default]
    None = 0,

    /// Blocks are compressed with zstd
    Zstd = 1,
}

impl From<CompressionType> for u8 {
    fn from(value: CompressionType) -> Self {
        match value {
            CompressionType::None => 0,
            CompressionType::Zstd => 1,
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Zstd),
            other => Err(other),
        }
    }
}

/// Points to the extent of a file that stores a block
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,

    /// Size of the stored (possibly compressed) block, excluding the trailer
    pub size: u64,
}

impl Serializable for BlockHandle {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        write_varint64(writer, self.offset)?;
        write_varint64(writer, self.size)?;
        Ok(())
    }
}

impl Deserializable for BlockHandle {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let offset = read_varint64(reader)?;
        let size = read_varint64(reader)?;
        Ok(Self { offset, size })
    }
}

impl BlockHandle {
    /// Encodes into a fresh buffer
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_BLOCK_HANDLE_SIZE);

        // NOTE: Writing into a Vec cannot fail
        #[allow(clippy::expect_used)]
        self.serialize(&mut buf).expect("vec write should succeed");

        buf
    }
}

/// Fixed-size trailer at the end of every segment file
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Footer {
    /// Handle of the metaindex block
    pub metaindex_handle: BlockHandle,

    /// Handle of the index block
    pub index_handle: BlockHandle,
}

impl Serializable for Footer {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.metaindex_handle.serialize(&mut buf)?;
        self.index_handle.serialize(&mut buf)?;
        buf.resize(2 * MAX_BLOCK_HANDLE_SIZE, 0);

        buf.write_u64::<LittleEndian>(TABLE_MAGIC)?;
        debug_assert_eq!(FOOTER_SIZE, buf.len());

        writer.write_all(&buf)?;
        Ok(())
    }
}

impl Footer {
    /// Decodes a footer from its exact 48-byte encoding.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the magic number does not match.
    pub fn decode(buf: &[u8; FOOTER_SIZE]) -> crate::Result<Self> {
        let magic = u64::from_le_bytes(
            buf[2 * MAX_BLOCK_HANDLE_SIZE..]
                .try_into()
                .map_err(|_| crate::Error::Corruption("footer too short".to_string()))?,
        );

        if magic != TABLE_MAGIC {
            return Err(crate::Error::Corruption(format!(
                "bad table magic number: {magic:#x}"
            )));
        }

        let mut cursor = Cursor::new(&buf[..2 * MAX_BLOCK_HANDLE_SIZE]);
        let metaindex_handle = BlockHandle::deserialize(&mut cursor)
            .map_err(|_| crate::Error::Corruption("bad metaindex handle".to_string()))?;
        let index_handle = BlockHandle::deserialize(&mut cursor)
            .map_err(|_| crate::Error::Corruption("bad index handle".to_string()))?;

        Ok(Self {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Writes a finished block plus its trailer; returns the handle.
///
/// The caller has already applied compression; `compression` only names
/// what was done.
pub fn write_raw_block<W: Write>(
    writer: &mut W,
    offset: u64,
    contents: &[u8],
    compression: CompressionType,
) -> crate::Result<BlockHandle> {
    writer.write_all(contents)?;

    let type_byte = u8::from(compression);

    let crc = checksum::value(contents);
    let crc = checksum::extend(crc, &[type_byte]);

    writer.write_u8(type_byte)?;
    writer.write_u32::<LittleEndian>(checksum::mask(crc))?;

    Ok(BlockHandle {
        offset,
        size: contents.len() as u64,
    })
}

/// Reads a block (data, index, metaindex or bloom) through the segment's
/// shared file handle, verifying the trailer CRC if asked to, and
/// decompressing if needed.
pub fn read_block(
    file: &Mutex<File>,
    handle: BlockHandle,
    verify_checksums: bool,
) -> crate::Result<Vec<u8>> {
    let mut buf = vec![0u8; handle.size as usize + BLOCK_TRAILER_SIZE];

    {
        let mut file = file.lock().expect("lock is poisoned");
        file.seek(SeekFrom::Start(handle.offset))?;
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                crate::Error::Corruption("block extends past end of file".to_string())
            } else {
                crate::Error::Io(e)
            }
        })?;
    }

    let (contents, trailer) = buf.split_at(handle.size as usize);
    let type_byte = trailer[0];

    if verify_checksums {
        let stored = u32::from_le_bytes([trailer[1], trailer[2], trailer[3], trailer[4]]);

        let crc = checksum::value(contents);
        let crc = checksum::extend(crc, &[type_byte]);

        if checksum::unmask(stored) != crc {
            return Err(crate::Error::Corruption(
                "block checksum mismatch".to_string(),
            ));
        }
    }

    let compression = CompressionType::try_from(type_byte)
        .map_err(|t| crate::Error::Corruption(format!("unknown block compression type {t}")))?;

    match compression {
        CompressionType::None => {
            let mut contents = buf;
            contents.truncate(handle.size as usize);
            Ok(contents)
        }

        #[cfg(feature = "zstd")]
        CompressionType::Zstd => {
            let decompressed = zstd::stream::decode_all(contents)
                .map_err(|e| crate::Error::Corruption(format!("zstd decode failed: {e}")))?;
            Ok(decompressed)
        }

        #[cfg(not(feature = "zstd"))]
        CompressionType::Zstd => Err(crate::Error::NotSupported(
            "block is zstd-compressed, but the zstd feature is disabled".to_string(),
        )),
    }
}
