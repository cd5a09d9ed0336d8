//! Object-service storage adapter
//!
//! S3 and GCS differ only in how they move single objects around, so both
//! implement the small [`ObjectClient`] trait and share this adapter for the
//! [`ObjectStore`] contract: key layout, size accounting, pagination and
//! metadata decoding.
//!
//! Data and metadata are two independent uploads. If the metadata upload
//! fails after the data upload succeeded, the data object is left behind;
//! it is invisible to `list`/`exists` because existence follows the metadata
//! object. Object services offer no cross-object transaction to do better.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{
    data_key, metadata_key, stream_error, validate_key, Backup, BackupMetadata, DataReader,
    ObjectStore, METADATA_SUFFIX,
};
use crate::error::{DvomError, DvomResult};

/// Body of an upload
#[derive(Debug, Clone, Copy)]
pub enum ObjectSource<'a> {
    Bytes(&'a [u8]),
    /// A spooled file of known length
    File { path: &'a Path, len: u64 },
}

impl ObjectSource<'_> {
    pub fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One page of a key listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Continuation token for the next page, if any
    pub next_token: Option<String>,
}

/// Single-object operations of an object storage service
pub trait ObjectClient {
    /// Human-readable location, e.g. `s3://bucket`
    fn location(&self) -> String;

    fn put_object(&self, key: &str, source: ObjectSource<'_>) -> DvomResult<()>;

    /// `None` when the object does not exist
    fn get_object(&self, key: &str) -> DvomResult<Option<DataReader>>;

    fn head_object(&self, key: &str) -> DvomResult<bool>;

    /// Deleting a missing object succeeds
    fn delete_object(&self, key: &str) -> DvomResult<()>;

    fn list_page(&self, token: Option<&str>) -> DvomResult<ObjectPage>;
}

/// [`ObjectStore`] over any [`ObjectClient`]
#[derive(Debug)]
pub struct ObjectStorage<C> {
    client: C,
}

impl<C: ObjectClient> ObjectStorage<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Copy the data stream to a temp file so uploads have a known length
    fn spool(&self, backup: &mut Backup) -> DvomResult<(NamedTempFile, u64)> {
        let mut temp = NamedTempFile::new()
            .map_err(|e| DvomError::Storage(format!("Failed to create spool file: {}", e)))?;
        let len = io::copy(&mut backup.data, &mut temp)
            .map_err(|e| stream_error(e, "Failed to read backup data"))?;
        temp.flush()
            .map_err(|e| DvomError::Storage(format!("Failed to flush spool file: {}", e)))?;
        Ok((temp, len))
    }

    fn read_metadata(&self, key: &str) -> DvomResult<Option<BackupMetadata>> {
        match self.client.get_object(key)? {
            Some(reader) => serde_json::from_reader(reader).map(Some).map_err(|e| {
                DvomError::Storage(format!("Failed to parse metadata {}: {}", key, e))
            }),
            None => Ok(None),
        }
    }
}

impl<C: ObjectClient> ObjectStore for ObjectStorage<C> {
    fn store(&self, mut backup: Backup) -> DvomResult<()> {
        validate_key(&backup.id)?;

        let (spool, len) = self.spool(&mut backup)?;
        self.client.put_object(
            &data_key(&backup.id),
            ObjectSource::File {
                path: spool.path(),
                len,
            },
        )?;

        backup.metadata.id = backup.id.clone();
        backup.metadata.size = len;
        let metadata = serde_json::to_vec_pretty(&backup.metadata)?;
        if let Err(e) = self
            .client
            .put_object(&metadata_key(&backup.id), ObjectSource::Bytes(&metadata))
        {
            warn!(
                location = %self.client.location(),
                id = %backup.id,
                "Metadata upload failed; data object left without metadata"
            );
            return Err(e);
        }

        debug!(location = %self.client.location(), id = %backup.id, size = len, "Stored backup");
        Ok(())
    }

    fn retrieve(&self, id: &str) -> DvomResult<Backup> {
        validate_key(id)?;

        let metadata = self
            .read_metadata(&metadata_key(id))?
            .ok_or_else(|| DvomError::backup_not_found(id))?;
        let data = self
            .client
            .get_object(&data_key(id))?
            .ok_or_else(|| DvomError::backup_not_found(format!("{} (data object missing)", id)))?;

        Ok(Backup::new(id, metadata, data))
    }

    fn list(&self) -> DvomResult<Vec<BackupMetadata>> {
        let mut backups = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.client.list_page(token.as_deref())?;
            for key in page.keys.iter().filter(|k| k.ends_with(METADATA_SUFFIX)) {
                match self.read_metadata(key) {
                    Ok(Some(metadata)) => backups.push(metadata),
                    // deleted between listing and reading
                    Ok(None) => {}
                    Err(e) => warn!(key = %key, error = %e, "Skipping unreadable metadata"),
                }
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        backups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(backups)
    }

    fn delete(&self, id: &str) -> DvomResult<()> {
        validate_key(id)?;
        self.client.delete_object(&metadata_key(id))?;
        self.client.delete_object(&data_key(id))
    }

    fn exists(&self, id: &str) -> DvomResult<bool> {
        validate_key(id)?;
        self.client.head_object(&metadata_key(id))
    }
}
