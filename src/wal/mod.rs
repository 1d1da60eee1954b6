//! Write-ahead log.
//!
//! Record frame:
//!
//! ```text
//! masked_crc32c (4, little-endian) | length (2, little-endian) | type (1) | payload (length)
//! ```
//!
//! The CRC covers `length || type || payload`. Only the "full" record
//! type exists; any other type byte is corruption. The manifest uses the
//! exact same framing, its payloads are serialized version edits.

pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// CRC (4) + length (2) + type (1)
pub(crate) const HEADER_SIZE: usize = 7;

/// The only supported record type
pub(crate) const RECORD_TYPE_FULL: u8 = 1;

/// Maximum payload of a single record
pub const MAX_RECORD_SIZE: usize = u16::MAX as usize;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000001.log");

        let records: &[&[u8]] = &[b"first", b"", b"third record", &[0xab; 4_096]];

        let mut writer = Writer::create(&path)?;
        for record in records {
            writer.add_record(record)?;
        }
        writer.sync()?;

        let mut reader = Reader::open(&path)?;
        for record in records {
            let read = reader.read_record()?.expect("record should exist");
            assert_eq!(*record, read.as_slice());
        }
        assert!(reader.read_record()?.is_none(), "should be at EOF");

        Ok(())
    }

    #[test]
    fn oversized_record_is_rejected() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = Writer::create(dir.path().join("000001.log"))?;

        let payload = vec![0u8; MAX_RECORD_SIZE + 1];
        assert!(matches!(
            writer.add_record(&payload),
            Err(crate::Error::NotSupported(_))
        ));

        Ok(())
    }

    #[test]
    fn bit_flip_is_detected() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000001.log");

        {
            let mut writer = Writer::create(&path)?;
            writer.add_record(b"some important record")?;
            writer.sync()?;
        }

        let pristine = std::fs::read(&path)?;

        // Flipping any single bit must never produce a silent success
        for byte_idx in 0..pristine.len() {
            let mut corrupted = pristine.clone();
            corrupted[byte_idx] ^= 0x01;
            std::fs::write(&path, &corrupted)?;

            let mut reader = Reader::open(&path)?;
            match reader.read_record() {
                Ok(Some(record)) => {
                    panic!("byte {byte_idx}: corruption slipped through, got {record:?}")
                }
                Ok(None) | Err(crate::Error::Corruption(_)) => {}
                Err(e) => panic!("unexpected error kind: {e:?}"),
            }
        }

        Ok(())
    }

    #[test]
    fn truncated_tail_is_corruption() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000001.log");

        {
            let mut writer = Writer::create(&path)?;
            writer.add_record(b"abc")?;
            writer.add_record(b"defghi")?;
            writer.sync()?;
        }

        let pristine = std::fs::read(&path)?;

        // Cut into the second record's payload
        std::fs::write(&path, &pristine[..pristine.len() - 2])?;

        let mut reader = Reader::open(&path)?;
        assert_eq!(b"abc".to_vec(), reader.read_record()?.expect("first intact"));
        assert!(matches!(
            reader.read_record(),
            Err(crate::Error::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn unknown_record_type_is_corruption() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000001.log");

        {
            let mut writer = Writer::create(&path)?;
            writer.add_record(b"abc")?;
            writer.sync()?;
        }

        let mut bytes = std::fs::read(&path)?;
        bytes[6] = 99; // type byte
        std::fs::write(&path, &bytes)?;

        let mut reader = Reader::open(&path)?;
        assert!(matches!(
            reader.read_record(),
            Err(crate::Error::Corruption(_))
        ));

        Ok(())
    }
}
