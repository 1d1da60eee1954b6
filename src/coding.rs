//! Variable-length integer primitives shared by the block, WAL and manifest
//! encodings.
//!
//! Fixed-width integers are written little-endian through `byteorder`
//! directly at the call sites; only the varint and length-prefixed forms
//! live here.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Writes an unsigned 32-bit varint
pub fn write_varint32<W: Write>(writer: &mut W, mut value: u32) -> std::io::Result<()> {
    while value >= 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u8((value as u8) | 0x80)?;
        value >>= 7;
    }
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u8(value as u8)
}

/// Writes an unsigned 64-bit varint
pub fn write_varint64<W: Write>(writer: &mut W, mut value: u64) -> std::io::Result<()> {
    while value >= 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u8((value as u8) | 0x80)?;
        value >>= 7;
    }
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u8(value as u8)
}

/// Reads an unsigned 32-bit varint
pub fn read_varint32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut result: u32 = 0;

    for shift in (0..32).step_by(7) {
        let byte = reader.read_u8()?;
        result |= u32::from(byte & 0x7f) << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "varint32 overflow",
    ))
}

/// Reads an unsigned 64-bit varint
pub fn read_varint64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut result: u64 = 0;

    for shift in (0..64).step_by(7) {
        let byte = reader.read_u8()?;
        result |= u64::from(byte & 0x7f) << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "varint64 overflow",
    ))
}

/// Writes a length-prefixed byte string (varint32 length, then the raw bytes)
pub fn write_length_prefixed<W: Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    // NOTE: Keys and values are capped far below u32::MAX
    #[allow(clippy::cast_possible_truncation)]
    write_varint32(writer, bytes.len() as u32)?;
    writer.write_all(bytes)
}

/// Reads a length-prefixed byte string
pub fn read_length_prefixed<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = read_varint32(reader)? as usize;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn varint32_roundtrip() -> std::io::Result<()> {
        let values = [0, 1, 127, 128, 300, 16_383, 16_384, u32::from(u16::MAX), u32::MAX];

        let mut buf = vec![];
        for v in values {
            write_varint32(&mut buf, v)?;
        }

        let mut cursor = Cursor::new(buf);
        for v in values {
            assert_eq!(v, read_varint32(&mut cursor)?);
        }

        Ok(())
    }

    #[test]
    fn varint64_roundtrip() -> std::io::Result<()> {
        let values = [0, 1, 127, 128, 1 << 20, (1 << 56) - 1, u64::MAX];

        let mut buf = vec![];
        for v in values {
            write_varint64(&mut buf, v)?;
        }

        let mut cursor = Cursor::new(buf);
        for v in values {
            assert_eq!(v, read_varint64(&mut cursor)?);
        }

        Ok(())
    }

    #[test]
    fn varint32_encoded_lengths() -> std::io::Result<()> {
        for (value, expected_len) in [(0u32, 1), (127, 1), (128, 2), (16_384, 3), (u32::MAX, 5)] {
            let mut buf = vec![];
            write_varint32(&mut buf, value)?;
            assert_eq!(expected_len, buf.len());
        }
        Ok(())
    }

    #[test]
    fn varint32_truncated() {
        // Continuation bit set, but no next byte
        let mut cursor = Cursor::new(vec![0x80]);
        assert!(read_varint32(&mut cursor).is_err());
    }

    #[test]
    fn length_prefixed_roundtrip() -> std::io::Result<()> {
        let mut buf = vec![];
        write_length_prefixed(&mut buf, b"hello")?;
        write_length_prefixed(&mut buf, b"")?;
        write_length_prefixed(&mut buf, &[0u8; 1_000])?;

        let mut cursor = Cursor::new(buf);
        assert_eq!(b"hello".to_vec(), read_length_prefixed(&mut cursor)?);
        assert_eq!(Vec::<u8>::new(), read_length_prefixed(&mut cursor)?);
        assert_eq!(vec![0u8; 1_000], read_length_prefixed(&mut cursor)?);

        Ok(())
    }
}
