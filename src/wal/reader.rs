use super::{HEADER_SIZE, RECORD_TYPE_FULL};
use crate::checksum;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Reads back framed records written by [`super::Writer`].
///
/// A clean end of file is reported as `Ok(None)`; a torn frame, an
/// unknown record type or a checksum mismatch is reported as corruption —
/// the two cases are never conflated.
pub struct Reader {
    file: BufReader<File>,
}

impl Reader {
    /// Opens a log file for sequential reading.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            file: BufReader::new(file),
        })
    }

    /// Reads the next record.
    ///
    /// # Errors
    ///
    /// Will return `Err` on corruption or IO failure.
    pub fn read_record(&mut self) -> crate::Result<Option<Vec<u8>>> {
        let mut header = [0u8; HEADER_SIZE];

        match read_full(&mut self.file, &mut header)? {
            0 => return Ok(None),
            HEADER_SIZE => {}
            n => {
                return Err(crate::Error::Corruption(format!(
                    "truncated record header ({n} of {HEADER_SIZE} bytes)"
                )));
            }
        }

        let stored_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = usize::from(u16::from_le_bytes([header[4], header[5]]));
        let record_type = header[6];

        if record_type != RECORD_TYPE_FULL {
            return Err(crate::Error::Corruption(format!(
                "unknown record type {record_type}"
            )));
        }

        let mut payload = vec![0u8; len];
        let read = read_full(&mut self.file, &mut payload)?;
        if read != len {
            return Err(crate::Error::Corruption(format!(
                "truncated record payload ({read} of {len} bytes)"
            )));
        }

        let crc = checksum::value(&header[4..HEADER_SIZE]);
        let crc = checksum::extend(crc, &payload);

        if checksum::unmask(stored_crc) != crc {
            return Err(crate::Error::Corruption(
                "record checksum mismatch".to_string(),
            ));
        }

        Ok(Some(payload))
    }
}

// Reads until `buf` is full or EOF; returns the number of bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(filled)
}
