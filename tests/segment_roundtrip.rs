//! End-to-end checks of the segment file format: everything written by
//! the builder comes back, in order, through the reader.

use silt::segment::format::CompressionType;
use silt::BlockCache;
use silt::segment::iter::Iter as SegmentIter;
use silt::segment::writer::{Options as WriterOptions, Writer};
use silt::segment::{PointRead, Segment};
use silt::value::{InternalKey, ValueType};
use silt::ReadOptions;
use std::ops::Bound;
use std::sync::Arc;
use test_log::test;

fn writer_options(path: std::path::PathBuf) -> WriterOptions {
    WriterOptions {
        path,
        block_size: 4_096,
        block_restart_interval: 16,
        compression: CompressionType::None,
        bloom_bits_per_key: 10,
    }
}

fn build_segment(
    dir: &std::path::Path,
    entries: &[(InternalKey, Vec<u8>)],
) -> silt::Result<Arc<Segment>> {
    let path = dir.join("000001.sst");

    let mut writer = Writer::new(writer_options(path.clone()))?;
    for (key, value) in entries {
        writer.add(key, value)?;
    }
    let meta = writer.finish()?;

    assert_eq!(entries.len() as u64, meta.num_entries);
    assert_eq!(entries[0].0, meta.smallest);
    assert_eq!(entries[entries.len() - 1].0, meta.largest);

    let segment = Segment::open(
        path,
        1,
        meta.file_size,
        Arc::new(BlockCache::with_capacity_bytes(1_024 * 1_024)),
        true,
    )?;

    Ok(Arc::new(segment))
}

fn sample_entries(n: u32) -> Vec<(InternalKey, Vec<u8>)> {
    (0..n)
        .map(|i| {
            (
                InternalKey::new(
                    format!("key{i:06}").into_bytes(),
                    u64::from(i) + 1,
                    ValueType::Value,
                ),
                format!("value-{i}").into_bytes(),
            )
        })
        .collect()
}

#[test]
fn iterate_equals_input() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;

    let entries = sample_entries(5_000);
    let segment = build_segment(dir.path(), &entries)?;

    assert!(segment.block_count() > 1, "should span multiple blocks");

    let read = SegmentIter::new(Arc::clone(&segment), ReadOptions::default())
        .collect::<silt::Result<Vec<_>>>()?;

    assert_eq!(entries.len(), read.len());
    for ((key, value), (read_key, read_value)) in entries.iter().zip(&read) {
        assert_eq!(key, read_key);
        assert_eq!(value.as_slice(), &**read_value);
    }

    Ok(())
}

#[test]
fn iteration_is_strictly_increasing() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;

    let entries = sample_entries(2_000);
    let segment = build_segment(dir.path(), &entries)?;

    let mut previous: Option<InternalKey> = None;

    for entry in SegmentIter::new(segment, ReadOptions::default()) {
        let (key, _) = entry?;
        if let Some(previous) = &previous {
            assert!(previous < &key, "keys must be strictly increasing");
        }
        previous = Some(key);
    }

    Ok(())
}

#[test]
fn reverse_iteration() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;

    let entries = sample_entries(2_000);
    let segment = build_segment(dir.path(), &entries)?;

    let read = SegmentIter::new(segment, ReadOptions::default())
        .rev()
        .collect::<silt::Result<Vec<_>>>()?;

    assert_eq!(entries.len(), read.len());
    for ((key, _), (read_key, _)) in entries.iter().rev().zip(&read) {
        assert_eq!(key, read_key);
    }

    Ok(())
}

#[test]
fn ranged_iteration() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;

    let entries = sample_entries(1_000);
    let segment = build_segment(dir.path(), &entries)?;

    let lo = InternalKey::new(*b"key000100", silt::value::MAX_SEQNO, ValueType::Value);
    let hi = InternalKey::new(*b"key000199", 0, ValueType::Tombstone);

    let read = SegmentIter::with_range(
        segment,
        ReadOptions::default(),
        (Bound::Included(lo), Bound::Included(hi)),
    )
    .collect::<silt::Result<Vec<_>>>()?;

    assert_eq!(100, read.len());
    assert_eq!(b"key000100", &*read[0].0.user_key);
    assert_eq!(b"key000199", &*read[99].0.user_key);

    Ok(())
}

#[test]
fn point_reads() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;

    let entries = sample_entries(1_000);
    let segment = build_segment(dir.path(), &entries)?;

    let opts = ReadOptions::default();

    // Exact hit
    let target = InternalKey::new(*b"key000500", 501, ValueType::Value);
    match segment.point_read(&target, &opts)? {
        PointRead::Found(value) => assert_eq!(b"value-500", &*value),
        other => panic!("expected hit, got {other:?}"),
    }

    // Snapshot above the entry's seqno still sees it
    let target = InternalKey::new(*b"key000500", 100_000, ValueType::Value);
    assert!(matches!(
        segment.point_read(&target, &opts)?,
        PointRead::Found(_)
    ));

    // Snapshot below the entry's seqno does not
    let target = InternalKey::new(*b"key000500", 5, ValueType::Value);
    assert!(matches!(
        segment.point_read(&target, &opts)?,
        PointRead::NotFound
    ));

    // Absent key
    let target = InternalKey::new(*b"key000500x", 1_000_000, ValueType::Value);
    assert!(matches!(
        segment.point_read(&target, &opts)?,
        PointRead::NotFound
    ));

    Ok(())
}

#[test]
fn tombstones_are_reported() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;

    let entries = vec![
        (
            InternalKey::new(*b"alive", 1, ValueType::Value),
            b"v".to_vec(),
        ),
        (
            InternalKey::new(*b"dead", 2, ValueType::Tombstone),
            Vec::new(),
        ),
    ];
    let segment = build_segment(dir.path(), &entries)?;

    let opts = ReadOptions::default();

    let target = InternalKey::new(*b"dead", 10, ValueType::Value);
    assert!(matches!(
        segment.point_read(&target, &opts)?,
        PointRead::Deleted
    ));

    Ok(())
}

#[test]
fn bloom_filter_skips_absent_keys() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;

    let entries = sample_entries(1_000);
    let segment = build_segment(dir.path(), &entries)?;

    for (key, _) in &entries {
        assert!(segment.may_contain(&key.user_key));
    }

    let mut false_positives = 0;
    for i in 0..10_000 {
        if segment.may_contain(format!("absent{i:06}").as_bytes()) {
            false_positives += 1;
        }
    }
    assert!(false_positives <= 200, "{false_positives}");

    Ok(())
}

#[test]
fn corrupted_file_is_detected() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("000001.sst");

    let entries = sample_entries(1_000);

    let mut writer = Writer::new(writer_options(path.clone()))?;
    for (key, value) in &entries {
        writer.add(key, value)?;
    }
    let meta = writer.finish()?;

    // Flip one byte in the middle of the data area
    let mut bytes = std::fs::read(&path)?;
    bytes[1_000] ^= 0x01;
    std::fs::write(&path, &bytes)?;

    let block_cache = Arc::new(BlockCache::with_capacity_bytes(0));
    let segment = Segment::open(path, 1, meta.file_size, block_cache, false)?;

    let result = SegmentIter::new(
        Arc::new(segment),
        ReadOptions {
            verify_checksums: true,
            fill_cache: false,
        },
    )
    .collect::<silt::Result<Vec<_>>>();

    assert!(matches!(result, Err(silt::Error::Corruption(_))));

    Ok(())
}

#[test]
fn truncated_footer_is_corruption() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("000001.sst");

    let mut writer = Writer::new(writer_options(path.clone()))?;
    for (key, value) in sample_entries(100) {
        writer.add(&key, &value)?;
    }
    let meta = writer.finish()?;

    let bytes = std::fs::read(&path)?;
    std::fs::write(&path, &bytes[..bytes.len() - 10])?;

    let result = Segment::open(
        path,
        1,
        meta.file_size - 10,
        Arc::new(BlockCache::with_capacity_bytes(0)),
        false,
    );

    assert!(matches!(result, Err(silt::Error::Corruption(_))));

    Ok(())
}

#[cfg(feature = "zstd")]
#[test]
fn zstd_compressed_roundtrip() -> silt::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("000001.sst");

    let entries = (0..2_000u32)
        .map(|i| {
            (
                InternalKey::new(
                    format!("key{i:06}").into_bytes(),
                    u64::from(i) + 1,
                    ValueType::Value,
                ),
                // Compressible payload
                vec![b'z'; 100],
            )
        })
        .collect::<Vec<_>>();

    let mut writer = Writer::new(WriterOptions {
        path: path.clone(),
        block_size: 4_096,
        block_restart_interval: 16,
        compression: CompressionType::Zstd,
        bloom_bits_per_key: 10,
    })?;

    let mut uncompressed_size = 0u64;
    for (key, value) in &entries {
        writer.add(key, value)?;
        uncompressed_size += (key.encoded_len() + value.len()) as u64;
    }
    let meta = writer.finish()?;

    assert!(
        meta.file_size < uncompressed_size,
        "zstd should shrink a repetitive payload"
    );

    let segment = Segment::open(
        path,
        1,
        meta.file_size,
        Arc::new(BlockCache::with_capacity_bytes(0)),
        true,
    )?;

    let read = SegmentIter::new(Arc::new(segment), ReadOptions::default())
        .collect::<silt::Result<Vec<_>>>()?;

    assert_eq!(entries.len(), read.len());

    Ok(())
}
