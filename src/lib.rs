//! An embedded, persistent, ordered key-value store based on a
//! log-structured merge-tree (LSM-tree).
//!
//! ##### About
//!
//! This crate exports a [`Db`] that maps opaque byte-string keys to
//! opaque byte-string values, with point reads, point writes, tombstone
//! deletes and forward/reverse range iteration.
//!
//! Writes land in a write-ahead log and an in-memory sorted buffer
//! (the memtable); concurrent writers are batched into single log
//! records by a group-commit leader. Once the memtable grows too large
//! it is frozen and flushed to an immutable sorted file (segment) by a
//! background worker. Segments are arranged in levels and periodically
//! merged ("compacted") into the next level, dropping shadowed versions
//! and deleted entries, which keeps read amplification and disk usage
//! bounded.
//!
//! The set of live segments is versioned: every flush and compaction
//! journals a delta into a manifest, and reopening the database replays
//! the manifest to recover the exact file set, then replays the
//! write-ahead logs to recover unflushed writes.
//!
//! # Example usage
//!
//! ```
//! use silt::{Config, WriteOptions};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! // A database maps byte keys to byte values
//! let db = Config::new(folder).open()?;
//!
//! // Durability of each write is tunable
//! db.put("my_key", "my_value", WriteOptions { sync: false })?;
//!
//! let item = db.get("my_key")?;
//! assert_eq!(Some("my_value".as_bytes().into()), item);
//!
//! // Deletes write tombstones, which compaction eventually drops
//! db.delete("my_key", WriteOptions::default())?;
//! assert!(db.get("my_key")?.is_none());
//!
//! // Range scans over a pinned snapshot; reverse works too
//! db.put("a", "1", WriteOptions::default())?;
//! db.put("b", "2", WriteOptions::default())?;
//!
//! for kv in &db.range("a"..="z") {
//!     let (key, value) = kv?;
//!     // ...
//! }
//! for kv in (&db.iter()).into_iter().rev() {
//!     let (key, value) = kv?;
//!     // ...
//! }
//! #
//! # Ok::<(), silt::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

#[doc(hidden)]
pub mod bloom;

mod block_cache;

#[doc(hidden)]
pub mod checksum;

#[doc(hidden)]
pub mod coding;

mod compaction;

#[doc(hidden)]
pub mod comparator;

mod config;
mod db;
mod error;
mod file;
mod flush;

#[doc(hidden)]
pub mod hash;

#[doc(hidden)]
pub mod memtable;

#[doc(hidden)]
pub mod merge;

#[doc(hidden)]
pub mod segment;

#[doc(hidden)]
pub mod serde;

mod table_cache;

#[doc(hidden)]
pub mod value;

#[doc(hidden)]
pub mod version;

#[doc(hidden)]
pub mod wal;

pub use block_cache::BlockCache;
pub use config::{Config, ReadOptions, WriteOptions};
pub use db::{Db, DbIterator, Iter};
pub use error::{Error, Result};
pub use segment::format::CompressionType;
pub use value::{SeqNo, UserKey, UserValue, ValueType};
