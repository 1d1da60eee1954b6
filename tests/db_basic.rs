use silt::{Config, WriteOptions};
use test_log::test;

#[test]
fn empty_get() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    assert!(db.get("foo")?.is_none());

    Ok(())
}

#[test]
fn put_get_overwrite() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.put("foo", "v1", WriteOptions::default())?;
    db.put("bar", "v2", WriteOptions::default())?;
    db.put("foo", "v3", WriteOptions::default())?;

    assert_eq!(Some("v3".as_bytes().into()), db.get("foo")?);
    assert_eq!(Some("v2".as_bytes().into()), db.get("bar")?);

    Ok(())
}

#[test]
fn delete() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.put("foo", "v1", WriteOptions::default())?;
    db.delete("foo", WriteOptions::default())?;

    assert!(db.get("foo")?.is_none());

    let iter = db.iter();
    assert_eq!(0, (&iter).into_iter().count());

    Ok(())
}

#[test]
fn delete_missing_key_is_ok() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.delete("never-existed", WriteOptions::default())?;
    assert!(db.get("never-existed")?.is_none());

    Ok(())
}

#[test]
fn iterator_is_sorted() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.put("a", "va", WriteOptions::default())?;
    db.put("c", "vc", WriteOptions::default())?;
    db.put("b", "vb", WriteOptions::default())?;

    let iter = db.iter();
    let items = (&iter).into_iter().collect::<silt::Result<Vec<_>>>()?;

    assert_eq!(3, items.len());
    assert_eq!((b"a".as_slice(), b"va".as_slice()), (&*items[0].0, &*items[0].1));
    assert_eq!((b"b".as_slice(), b"vb".as_slice()), (&*items[1].0, &*items[1].1));
    assert_eq!((b"c".as_slice(), b"vc".as_slice()), (&*items[2].0, &*items[2].1));

    Ok(())
}

#[test]
fn iterator_reverse() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.put("a", "va", WriteOptions::default())?;
    db.put("c", "vc", WriteOptions::default())?;
    db.put("b", "vb", WriteOptions::default())?;

    let iter = db.iter();
    let keys = (&iter)
        .into_iter()
        .rev()
        .map(|kv| kv.map(|(k, _)| k))
        .collect::<silt::Result<Vec<_>>>()?;

    assert_eq!(
        vec![b"c".as_slice(), b"b", b"a"],
        keys.iter().map(|k| &**k).collect::<Vec<_>>()
    );

    Ok(())
}

#[test]
fn iterator_sees_newest_version_only() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    for i in 0..10 {
        db.put("key", format!("v{i}"), WriteOptions::default())?;
    }

    let iter = db.iter();
    let items = (&iter).into_iter().collect::<silt::Result<Vec<_>>>()?;

    assert_eq!(1, items.len());
    assert_eq!(b"v9".as_slice(), &*items[0].1);

    Ok(())
}

#[test]
fn range_bounds() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    for key in ["a", "b", "c", "d", "e"] {
        db.put(key, key, WriteOptions::default())?;
    }

    let range = db.range("b".."d");
    let keys = (&range)
        .into_iter()
        .map(|kv| kv.map(|(k, _)| k))
        .collect::<silt::Result<Vec<_>>>()?;
    assert_eq!(
        vec![b"b".as_slice(), b"c"],
        keys.iter().map(|k| &**k).collect::<Vec<_>>()
    );

    let range = db.range("b"..="d");
    assert_eq!(3, (&range).into_iter().count());

    let range = db.range(.."c");
    assert_eq!(2, (&range).into_iter().count());

    let range = db.range("d"..);
    assert_eq!(2, (&range).into_iter().count());

    Ok(())
}

#[test]
fn empty_value_roundtrip() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    db.put("key", "", WriteOptions::default())?;
    assert_eq!(Some("".as_bytes().into()), db.get("key")?);

    Ok(())
}

#[test]
fn binary_keys_and_values() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    let key = [0u8, 255, 1, 254, 2];
    let value = vec![0u8; 4_096];

    db.put(key, &value, WriteOptions::default())?;
    assert_eq!(Some(value.as_slice().into()), db.get(key)?);

    Ok(())
}

#[test]
fn oversized_write_is_rejected_cleanly() -> silt::Result<()> {
    let folder = tempfile::tempdir()?;
    let db = Config::new(&folder).open()?;

    let huge = vec![0u8; 100_000];
    assert!(matches!(
        db.put("key", &huge, WriteOptions::default()),
        Err(silt::Error::InvalidArgument(_))
    ));

    // The engine stays writable afterwards
    db.put("key", "small", WriteOptions::default())?;
    assert_eq!(Some("small".as_bytes().into()), db.get("key")?);

    Ok(())
}
