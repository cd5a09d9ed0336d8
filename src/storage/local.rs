//! Filesystem storage backend
//!
//! Each backup is two files in one directory: `<id>.tar.gz` and `<id>.json`.
//! Data is spooled into a temp file in the same directory and renamed into
//! place before the metadata is written, so a failed store never leaves a
//! metadata file pointing at missing or partial data. Storing over an
//! existing id moves the old data aside first and puts it back if the store
//! fails.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, warn};

use super::file_io::{read_json_required, write_json_atomic};
use super::{
    data_key, metadata_key, stream_error, validate_key, Backup, BackupMetadata, ObjectStore,
    METADATA_SUFFIX,
};
use crate::error::{DvomError, DvomResult};

/// Backups stored in a local directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Open (and create if needed) a backup directory
    pub fn new(base_path: impl AsRef<Path>) -> DvomResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if base_path.as_os_str().is_empty() {
            return Err(DvomError::Config(
                "base path is required for local storage".into(),
            ));
        }
        fs::create_dir_all(&base_path).map_err(|e| {
            DvomError::Storage(format!(
                "Failed to create backup directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.base_path.join(metadata_key(id))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.base_path.join(data_key(id))
    }

    /// Spool the backup stream into a synced temp file beside the data files
    fn spool_data(&self, backup: &mut Backup) -> DvomResult<(NamedTempFile, u64)> {
        let mut temp = NamedTempFile::new_in(&self.base_path)
            .map_err(|e| DvomError::Storage(format!("Failed to create temp file: {}", e)))?;

        let written = io::copy(&mut backup.data, &mut temp)
            .map_err(|e| stream_error(e, "Failed to write backup data"))?;
        temp.flush()
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| DvomError::Storage(format!("Failed to sync backup data: {}", e)))?;
        Ok((temp, written))
    }

    /// Move existing data for `id` to a temp path that is removed on drop
    fn set_aside(&self, id: &str) -> DvomResult<Option<TempPath>> {
        let data_path = self.data_path(id);
        if !data_path.exists() {
            return Ok(None);
        }
        warn!(id = %id, "Replacing existing backup data");

        let aside = tempfile::Builder::new()
            .prefix(".replaced-")
            .tempfile_in(&self.base_path)
            .map_err(|e| DvomError::Storage(format!("Failed to create temp file: {}", e)))?
            .into_temp_path();
        fs::rename(&data_path, &aside).map_err(|e| {
            DvomError::Storage(format!("Failed to move {} aside: {}", data_path.display(), e))
        })?;
        Ok(Some(aside))
    }

    /// Undo a partial store: drop the new data and bring back the old
    fn roll_back(&self, id: &str, previous: Option<TempPath>) {
        let data_path = self.data_path(id);
        match previous {
            Some(aside) => {
                if let Err(e) = fs::rename(&aside, &data_path) {
                    // Keep the old data on disk rather than let the drop remove it
                    let kept = aside.keep().map(|p| p.display().to_string());
                    warn!(id = %id, error = %e, kept = ?kept, "Failed to restore previous backup data");
                }
            }
            None => {
                if let Err(e) = remove_if_present(&data_path) {
                    warn!(id = %id, error = %e, "Failed to roll back backup data");
                }
            }
        }
    }
}

fn remove_if_present(path: &Path) -> DvomResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DvomError::Storage(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

impl ObjectStore for LocalStorage {
    fn store(&self, mut backup: Backup) -> DvomResult<()> {
        validate_key(&backup.id)?;

        let (temp, written) = self.spool_data(&mut backup)?;
        backup.metadata.id = backup.id.clone();
        backup.metadata.size = written;

        let previous = self.set_aside(&backup.id)?;
        if let Err(e) = temp.persist(self.data_path(&backup.id)) {
            self.roll_back(&backup.id, previous);
            return Err(DvomError::Storage(format!(
                "Failed to move backup data into place: {}",
                e
            )));
        }

        if let Err(e) = write_json_atomic(self.metadata_path(&backup.id), &backup.metadata) {
            self.roll_back(&backup.id, previous);
            return Err(e);
        }

        debug!(id = %backup.id, size = written, "Stored backup");
        Ok(())
    }

    fn retrieve(&self, id: &str) -> DvomResult<Backup> {
        validate_key(id)?;

        let metadata_path = self.metadata_path(id);
        if !metadata_path.exists() {
            return Err(DvomError::backup_not_found(id));
        }
        let metadata: BackupMetadata = read_json_required(&metadata_path)?;

        let data = match File::open(self.data_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DvomError::backup_not_found(format!("{} (data file missing)", id)))
            }
            Err(e) => {
                return Err(DvomError::Storage(format!(
                    "Failed to open backup data for {}: {}",
                    id, e
                )))
            }
        };

        Ok(Backup::new(id, metadata, Box::new(BufReader::new(data))))
    }

    fn list(&self) -> DvomResult<Vec<BackupMetadata>> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            DvomError::Storage(format!("Failed to read backup directory: {}", e))
        })?;

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| DvomError::Storage(format!("Failed to read backup directory: {}", e)))?;
            let path = entry.path();
            let is_metadata = path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(METADATA_SUFFIX));
            if !is_metadata {
                continue;
            }

            match read_json_required::<BackupMetadata>(&path) {
                Ok(metadata) => backups.push(metadata),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable metadata"),
            }
        }

        backups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(backups)
    }

    fn delete(&self, id: &str) -> DvomResult<()> {
        validate_key(id)?;
        // Metadata first: once it is gone the backup no longer exists
        remove_if_present(&self.metadata_path(id))?;
        remove_if_present(&self.data_path(id))
    }

    fn exists(&self, id: &str) -> DvomResult<bool> {
        validate_key(id)?;
        Ok(self.metadata_path(id).is_file())
    }
}
