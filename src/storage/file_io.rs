//! JSON documents on disk
//!
//! Writers spool into a `NamedTempFile` beside the target and persist it
//! over the target, the same way `LocalStorage` lands backup data. Readers
//! treat a missing file as an error.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::error::{DvomError, DvomResult};

/// Parse a JSON document that must exist
pub fn read_json_required<T: DeserializeOwned>(path: impl AsRef<Path>) -> DvomResult<T> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| DvomError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| DvomError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Replace `path` with the pretty-printed JSON of `data`
///
/// Readers see either the previous document or the new one. The temp file
/// is removed when anything fails before the persist.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: impl AsRef<Path>, data: &T) -> DvomResult<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| {
        DvomError::Storage(format!("Failed to create directory {}: {}", dir.display(), e))
    })?;

    let temp = NamedTempFile::new_in(dir)
        .map_err(|e| DvomError::Storage(format!("Failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(temp);
    serde_json::to_writer_pretty(&mut writer, data)
        .map_err(|e| DvomError::Storage(format!("Failed to serialize {}: {}", path.display(), e)))?;
    let temp = writer
        .into_inner()
        .map_err(|e| DvomError::Storage(format!("Failed to flush {}: {}", path.display(), e.error())))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| DvomError::Storage(format!("Failed to sync {}: {}", path.display(), e)))?;

    temp.persist(path).map_err(|e| {
        DvomError::Storage(format!("Failed to move {} into place: {}", path.display(), e))
    })?;
    Ok(())
}
