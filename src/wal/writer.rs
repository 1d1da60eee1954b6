use super::{HEADER_SIZE, MAX_RECORD_SIZE, RECORD_TYPE_FULL};
use crate::checksum;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends framed records to a log file
pub struct Writer {
    path: PathBuf,
    file: BufWriter<File>,
}

impl Writer {
    /// Creates a new log file (or appends to an existing one).
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn create<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    /// The path of the log file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and flushes it to the OS.
    ///
    /// Durability against power loss additionally requires [`Writer::sync`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if the payload exceeds the frame limit or an IO
    /// error occurs.
    pub fn add_record(&mut self, payload: &[u8]) -> crate::Result<()> {
        if payload.len() > MAX_RECORD_SIZE {
            return Err(crate::Error::NotSupported(format!(
                "WAL record too large: {} bytes (max {MAX_RECORD_SIZE})",
                payload.len(),
            )));
        }

        let mut header = [0u8; HEADER_SIZE];

        // NOTE: Bounds-checked above
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u16;

        header[4] = (len & 0xff) as u8;
        header[5] = (len >> 8) as u8;
        header[6] = RECORD_TYPE_FULL;

        // The CRC covers length || type || payload
        let crc = checksum::value(&header[4..HEADER_SIZE]);
        let crc = checksum::extend(crc, payload);

        (&mut header[0..4]).write_u32::<LittleEndian>(checksum::mask(crc))?;

        self.file.write_all(&header)?;
        self.file.write_all(payload)?;
        self.file.flush()?;

        Ok(())
    }

    /// Forces all previously written records to stable storage.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn sync(&mut self) -> crate::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }
}
