use silt::{Config, Db, WriteOptions};
use test_log::test;

#[test]
fn reopen_recovers_unflushed_writes() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().to_path_buf();

    {
        let db = Config::new(&path).open()?;
        db.put("alpha", "1", WriteOptions { sync: true })?;
        db.put("beta", "2", WriteOptions::default())?;
    }

    let db = Config::new(&path).open()?;
    assert_eq!(Some("1".as_bytes().into()), db.get("alpha")?);
    assert_eq!(Some("2".as_bytes().into()), db.get("beta")?);

    Ok(())
}

#[test]
fn reopen_recovers_flushed_segments() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().to_path_buf();

    {
        let db = Config::new(&path).write_buffer_size(10 * 1_024).open()?;
        for i in 0..1_000u32 {
            db.put(format!("key{i:05}"), [3u8; 100], WriteOptions::default())?;
        }
    }

    let db = Config::new(&path).write_buffer_size(10 * 1_024).open()?;
    for i in 0..1_000u32 {
        assert!(
            db.get(format!("key{i:05}"))?.is_some(),
            "key{i:05} lost across reopen"
        );
    }

    Ok(())
}

#[test]
fn reopen_keeps_deletes() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().to_path_buf();

    {
        let db = Config::new(&path).open()?;
        db.put("gone", "here", WriteOptions::default())?;
        db.delete("gone", WriteOptions { sync: true })?;
    }

    let db = Config::new(&path).open()?;
    assert!(db.get("gone")?.is_none());

    Ok(())
}

#[test]
fn several_incarnations() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().to_path_buf();

    for generation in 0..5u32 {
        let db = Config::new(&path).open()?;

        // Everything from earlier incarnations is still there
        for old in 0..generation {
            for i in 0..50u32 {
                let value = db.get(format!("g{old}-{i:03}"))?.expect("key lost");
                assert_eq!(format!("v{old}").as_bytes(), &*value);
            }
        }

        for i in 0..50u32 {
            db.put(
                format!("g{generation}-{i:03}"),
                format!("v{generation}"),
                WriteOptions::default(),
            )?;
        }
    }

    Ok(())
}

#[test]
fn recovery_without_current_file() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().to_path_buf();

    {
        let db = Config::new(&path).write_buffer_size(10 * 1_024).open()?;
        for i in 0..500u32 {
            db.put(format!("key{i:04}"), [5u8; 100], WriteOptions::default())?;
        }
    }

    std::fs::remove_file(path.join("CURRENT"))?;

    let db = Config::new(&path).open()?;
    for i in 0..500u32 {
        assert!(db.get(format!("key{i:04}"))?.is_some());
    }

    Ok(())
}

#[test]
fn create_if_missing_disabled() {
    let folder = tempfile::tempdir().expect("should create tempdir");
    let missing = folder.path().join("does-not-exist");

    let result = Config::new(missing).create_if_missing(false).open();
    assert!(matches!(result, Err(silt::Error::InvalidArgument(_))));
}

#[test]
fn error_if_exists() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("db");

    drop(Config::new(&path).open()?);

    let result = Config::new(&path).error_if_exists(true).open();
    assert!(matches!(result, Err(silt::Error::InvalidArgument(_))));

    Ok(())
}

#[test]
fn destroy_removes_all_files() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("db");

    {
        let db = Config::new(&path).write_buffer_size(10 * 1_024).open()?;
        for i in 0..500u32 {
            db.put(format!("key{i:04}"), [9u8; 100], WriteOptions::default())?;
        }
    }

    Db::destroy(&path)?;
    assert!(!path.exists());

    Ok(())
}

#[test]
fn wal_files_are_collected() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().to_path_buf();

    for _ in 0..5 {
        let db = Config::new(&path).open()?;
        db.put("key", "value", WriteOptions::default())?;
        drop(db);
    }

    // Only the active WAL should remain; old ones were either replayed
    // into segments or superseded
    let logs = std::fs::read_dir(&path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(".log"))
        })
        .count();

    assert!(logs <= 2, "{logs} WAL files left behind");

    Ok(())
}
