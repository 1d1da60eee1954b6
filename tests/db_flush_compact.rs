use silt::{Config, WriteOptions};
use test_log::test;

#[test]
fn survives_flush_and_compaction() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .write_buffer_size(10 * 1_024)
        .open()?;

    let value = vec![0xabu8; 200];

    for i in 0..2_000u32 {
        db.put(format!("key{i:05}"), &value, WriteOptions::default())?;
    }

    for i in 0..2_000u32 {
        let read = db.get(format!("key{i:05}"))?.unwrap_or_else(|| {
            panic!("key{i:05} should exist");
        });
        assert_eq!(200, read.len(), "key{i:05} has a torn value");
    }

    Ok(())
}

#[test]
fn data_moves_out_of_the_memtable() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .write_buffer_size(10 * 1_024)
        .open()?;

    for i in 0..500u32 {
        db.put(format!("key{i:05}"), [0u8; 200], WriteOptions::default())?;
    }

    // Wait for the background worker to catch up
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let on_disk: usize = (0..7).map(|level| db.num_files_at_level(level)).sum();
        if on_disk > 0 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "no segment was ever written"
        );
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    Ok(())
}

#[test]
fn overwrites_survive_compaction() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .write_buffer_size(10 * 1_024)
        .open()?;

    // Write several generations of the same keys so compaction has
    // versions to drop
    for generation in 0..10u32 {
        for i in 0..200u32 {
            db.put(
                format!("key{i:04}"),
                format!("gen{generation}-{}", "x".repeat(100)),
                WriteOptions::default(),
            )?;
        }
    }

    for i in 0..200u32 {
        let value = db.get(format!("key{i:04}"))?.expect("key should exist");
        assert!(value.starts_with(b"gen9-"), "stale version for key{i:04}");
    }

    Ok(())
}

#[test]
fn deletes_survive_compaction() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .write_buffer_size(10 * 1_024)
        .open()?;

    for i in 0..500u32 {
        db.put(format!("key{i:04}"), [0u8; 100], WriteOptions::default())?;
    }

    // Delete every odd key, then churn to force flushes + compactions
    for i in (1..500u32).step_by(2) {
        db.delete(format!("key{i:04}"), WriteOptions::default())?;
    }

    for i in 0..500u32 {
        db.put(format!("other{i:04}"), [0u8; 100], WriteOptions::default())?;
    }

    for i in 0..500u32 {
        let read = db.get(format!("key{i:04}"))?;
        if i % 2 == 0 {
            assert!(read.is_some(), "key{i:04} must exist");
        } else {
            assert!(read.is_none(), "key{i:04} must stay deleted");
        }
    }

    Ok(())
}

#[test]
fn iterator_over_mixed_storage() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .write_buffer_size(10 * 1_024)
        .open()?;

    // Enough to push older entries into segments while newer ones stay
    // in the memtable
    for i in 0..1_000u32 {
        db.put(format!("key{i:05}"), [0u8; 100], WriteOptions::default())?;
    }

    let iter = db.iter();
    let count = (&iter)
        .into_iter()
        .collect::<silt::Result<Vec<_>>>()?
        .len();
    assert_eq!(1_000, count);

    // Reverse sees the same set
    let iter = db.iter();
    let count = (&iter).into_iter().rev().count();
    assert_eq!(1_000, count);

    Ok(())
}

#[test]
fn compression_roundtrip() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .write_buffer_size(10 * 1_024)
        .compression(if cfg!(feature = "zstd") {
            silt::CompressionType::Zstd
        } else {
            silt::CompressionType::None
        })
        .open()?;

    // Highly compressible values
    for i in 0..1_000u32 {
        db.put(format!("key{i:05}"), "A".repeat(150), WriteOptions::default())?;
    }

    for i in 0..1_000u32 {
        let value = db.get(format!("key{i:05}"))?.expect("key should exist");
        assert_eq!(150, value.len());
    }

    Ok(())
}

#[test]
fn checksums_verified_when_paranoid() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;

    let db = Config::new(&folder)
        .write_buffer_size(10 * 1_024)
        .paranoid_checks(true)
        .open()?;

    for i in 0..1_000u32 {
        db.put(format!("key{i:05}"), [7u8; 100], WriteOptions::default())?;
    }

    for i in 0..1_000u32 {
        assert!(db.get(format!("key{i:05}"))?.is_some());
    }

    Ok(())
}
