//! Database directory layout and filename helpers.
//!
//! ```text
//! 000001.log      write-ahead log
//! 000002.sst      segment (sorted file)
//! MANIFEST-000003 version-edit log
//! CURRENT         name of the active manifest
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the pointer file naming the active manifest
pub const CURRENT_FILE: &str = "CURRENT";

/// A parsed, engine-owned file name
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileType {
    /// Write-ahead log
    Log(u64),

    /// Segment file
    Table(u64),

    /// Manifest (version-edit log)
    Manifest(u64),

    /// The CURRENT pointer file
    Current,
}

/// Path of a WAL file
pub fn log_file_path<P: AsRef<Path>>(dir: P, number: u64) -> PathBuf {
    dir.as_ref().join(format!("{number:06}.log"))
}

/// Path of a segment file
pub fn table_file_path<P: AsRef<Path>>(dir: P, number: u64) -> PathBuf {
    dir.as_ref().join(format!("{number:06}.sst"))
}

/// Path of a manifest file
pub fn manifest_file_path<P: AsRef<Path>>(dir: P, number: u64) -> PathBuf {
    dir.as_ref().join(format!("MANIFEST-{number:06}"))
}

/// Parses an engine-owned file name; returns `None` for foreign files
#[must_use]
pub fn parse_file_name(name: &str) -> Option<FileType> {
    if name == CURRENT_FILE {
        return Some(FileType::Current);
    }

    if let Some(number) = name.strip_prefix("MANIFEST-") {
        return number.parse().ok().map(FileType::Manifest);
    }

    if let Some(number) = name.strip_suffix(".log") {
        return number.parse().ok().map(FileType::Log);
    }

    if let Some(number) = name.strip_suffix(".sst") {
        return number.parse().ok().map(FileType::Table);
    }

    None
}

/// Points `CURRENT` at the given manifest.
///
/// The pointer is staged in a temporary file and renamed over `CURRENT`,
/// then the result is synced. Recovery trusts `CURRENT` before it falls
/// back to scanning the folder, so a crash mid-update must never leave a
/// torn or half-written pointer behind: truncate-then-write would expose
/// an empty file, and a plain overwrite could mix old and new bytes.
pub fn set_current_file<P: AsRef<Path>>(dir: P, manifest_number: u64) -> crate::Result<()> {
    let dir = dir.as_ref();

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    writeln!(staged, "MANIFEST-{manifest_number:06}")?;
    staged.flush()?;

    let pointer = staged
        .persist(dir.join(CURRENT_FILE))
        .map_err(|e| crate::Error::Io(e.error))?;
    pointer.sync_all()?;

    Ok(())
}

/// Reads `CURRENT`; returns the manifest number it points at
#[must_use]
pub fn read_current_file<P: AsRef<Path>>(dir: P) -> Option<u64> {
    let content = std::fs::read_to_string(dir.as_ref().join(CURRENT_FILE)).ok()?;

    match parse_file_name(content.trim()) {
        Some(FileType::Manifest(number)) => Some(number),
        _ => None,
    }
}
