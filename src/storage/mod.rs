//! Storage layer for dvom
//!
//! Every backend implements the same five-operation [`ObjectStore`]
//! contract. Backups are persisted as two objects under one key:
//! `<key>.json` (metadata) and `<key>.tar.gz` (data). Versioned snapshot
//! naming is layered on top by [`SnapshotStorage`].

pub mod file_io;
#[cfg(feature = "gcs")]
pub mod gcs;
pub mod local;
pub mod object;
#[cfg(feature = "s3")]
pub mod s3;
pub mod snapshot;

use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::SecureString;
use crate::error::{DvomError, DvomResult};

pub use local::LocalStorage;
pub use object::{ObjectClient, ObjectPage, ObjectSource, ObjectStorage};
pub use snapshot::{clean_snapshot_name, SnapshotInfo, SnapshotStorage, VersionInfo};

/// Readable byte stream of a backup, consumed once
pub type DataReader = Box<dyn Read + Send>;

/// Suffix of the metadata object
pub const METADATA_SUFFIX: &str = ".json";

/// Suffix of the data object
pub const DATA_SUFFIX: &str = ".tar.gz";

/// Metadata stored next to every backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub backup_type: String,
    /// Stored size in bytes (after encryption, if encrypted)
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Comma-joined source volume names
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Version token, set by the versioning layer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl BackupMetadata {
    pub fn new(name: impl Into<String>, backup_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            backup_type: backup_type.into(),
            size: 0,
            created_at: Utc::now(),
            volume_name: String::new(),
            description: String::new(),
            version: String::new(),
            encrypted: false,
        }
    }

    /// Source volumes as a list
    pub fn volumes(&self) -> Vec<&str> {
        self.volume_name
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    }
}

/// A backup: identifier, metadata and a one-shot data stream
pub struct Backup {
    pub id: String,
    pub metadata: BackupMetadata,
    pub data: DataReader,
}

impl Backup {
    pub fn new(id: impl Into<String>, metadata: BackupMetadata, data: DataReader) -> Self {
        Self {
            id: id.into(),
            metadata,
            data,
        }
    }
}

impl fmt::Debug for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backup")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The contract every storage backend implements identically
pub trait ObjectStore {
    /// Persist data and metadata under `backup.id`
    ///
    /// The stored `size` is the number of data bytes actually written.
    fn store(&self, backup: Backup) -> DvomResult<()>;

    /// Fetch a backup; not-found if either object is missing
    fn retrieve(&self, id: &str) -> DvomResult<Backup>;

    /// All metadata records, across every backend page
    fn list(&self) -> DvomResult<Vec<BackupMetadata>>;

    /// Remove a backup; deleting a missing id is not an error
    fn delete(&self, id: &str) -> DvomResult<()>;

    /// Whether the metadata object for `id` exists
    fn exists(&self, id: &str) -> DvomResult<bool>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn store(&self, backup: Backup) -> DvomResult<()> {
        (**self).store(backup)
    }

    fn retrieve(&self, id: &str) -> DvomResult<Backup> {
        (**self).retrieve(id)
    }

    fn list(&self) -> DvomResult<Vec<BackupMetadata>> {
        (**self).list()
    }

    fn delete(&self, id: &str) -> DvomResult<()> {
        (**self).delete(id)
    }

    fn exists(&self, id: &str) -> DvomResult<bool> {
        (**self).exists(id)
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn store(&self, backup: Backup) -> DvomResult<()> {
        (**self).store(backup)
    }

    fn retrieve(&self, id: &str) -> DvomResult<Backup> {
        (**self).retrieve(id)
    }

    fn list(&self) -> DvomResult<Vec<BackupMetadata>> {
        (**self).list()
    }

    fn delete(&self, id: &str) -> DvomResult<()> {
        (**self).delete(id)
    }

    fn exists(&self, id: &str) -> DvomResult<bool> {
        (**self).exists(id)
    }
}

/// Reject keys that could escape the backend's namespace
pub fn validate_key(id: &str) -> DvomResult<()> {
    if id.is_empty() {
        return Err(DvomError::Validation("backup id cannot be empty".into()));
    }
    if id.starts_with('.') {
        return Err(DvomError::Validation(format!(
            "backup id cannot start with '.': {}",
            id
        )));
    }
    if id.contains(['/', '\\', '\0']) {
        return Err(DvomError::Validation(format!(
            "backup id contains an invalid character: {}",
            id
        )));
    }
    Ok(())
}

/// Map a failed stream copy to a backend error, keeping errors raised by
/// our own adapters (decryption, size caps, cancellation) intact
pub(crate) fn stream_error(err: std::io::Error, context: &str) -> DvomError {
    match DvomError::from(err) {
        DvomError::Io(message) => DvomError::Storage(format!("{}: {}", context, message)),
        other => other,
    }
}

pub(crate) fn metadata_key(id: &str) -> String {
    format!("{}{}", id, METADATA_SUFFIX)
}

pub(crate) fn data_key(id: &str) -> String {
    format!("{}{}", id, DATA_SUFFIX)
}

/// Available storage backends
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    S3,
    Gcs,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::S3 => write!(f, "s3"),
            Self::Gcs => write!(f, "gcs"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub base_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<SecureString>,
}

#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    /// Defaults to `https://storage.googleapis.com`
    pub endpoint: Option<String>,
    pub token: Option<SecureString>,
}

/// Backend selection, one variant per [`BackendKind`]
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local(LocalConfig),
    S3(S3Config),
    Gcs(GcsConfig),
}

impl StorageConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::S3(_) => BackendKind::S3,
            Self::Gcs(_) => BackendKind::Gcs,
        }
    }

    /// Construct the configured backend
    pub fn open(&self) -> DvomResult<Box<dyn ObjectStore>> {
        match self {
            Self::Local(config) => Ok(Box::new(LocalStorage::new(&config.base_path)?)),
            Self::S3(config) => open_s3(config),
            Self::Gcs(config) => open_gcs(config),
        }
    }
}

#[cfg(feature = "s3")]
fn open_s3(config: &S3Config) -> DvomResult<Box<dyn ObjectStore>> {
    let client = s3::S3Client::connect(config)?;
    Ok(Box::new(ObjectStorage::new(client)))
}

#[cfg(not(feature = "s3"))]
fn open_s3(_config: &S3Config) -> DvomResult<Box<dyn ObjectStore>> {
    Err(DvomError::Config(
        "S3 storage is not available: dvom was built without the `s3` feature".into(),
    ))
}

#[cfg(feature = "gcs")]
fn open_gcs(config: &GcsConfig) -> DvomResult<Box<dyn ObjectStore>> {
    let client = gcs::GcsClient::connect(config)?;
    Ok(Box::new(ObjectStorage::new(client)))
}

#[cfg(not(feature = "gcs"))]
fn open_gcs(_config: &GcsConfig) -> DvomResult<Box<dyn ObjectStore>> {
    Err(DvomError::Config(
        "GCS storage is not available: dvom was built without the `gcs` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample_metadata() -> BackupMetadata {
        BackupMetadata {
            id: "db@20240102-030405".into(),
            name: "db".into(),
            backup_type: "volume-snapshot".into(),
            size: 120,
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            volume_name: "pgdata".into(),
            description: String::new(),
            version: "20240102-030405".into(),
            encrypted: false,
        }
    }

    #[test]
    fn test_metadata_json_field_names() {
        let json = serde_json::to_value(sample_metadata()).unwrap();
        assert_eq!(json["type"], "volume-snapshot");
        assert_eq!(json["volume_name"], "pgdata");
        assert_eq!(json["created_at"], "2024-01-02T03:04:05Z");
        // empty description and false flag are omitted
        assert!(json.get("description").is_none());
        assert!(json.get("encrypted").is_none());
    }

    #[test]
    fn test_metadata_reads_minimal_record() {
        let json = r#"{
            "id": "b1@20240101-000000",
            "name": "b1",
            "type": "volume-snapshot",
            "size": 10,
            "created_at": "2024-01-01T00:00:00Z",
            "container_id": "ignored"
        }"#;
        let metadata: BackupMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.name, "b1");
        assert!(!metadata.encrypted);
        assert!(metadata.version.is_empty());
    }

    #[test]
    fn test_volumes_split() {
        let mut metadata = sample_metadata();
        metadata.volume_name = "a, b,,c".into();
        assert_eq!(metadata.volumes(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("db@20240101-000000").is_ok());
        assert!(validate_key("").unwrap_err().is_validation());
        assert!(validate_key("../etc/passwd").unwrap_err().is_validation());
        assert!(validate_key("a/b").unwrap_err().is_validation());
        assert!(validate_key(".hidden").unwrap_err().is_validation());
    }

    #[test]
    fn test_local_config_opens_backend() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::Local(LocalConfig {
            base_path: temp_dir.path().join("store"),
        });
        assert_eq!(config.kind(), BackendKind::Local);

        let store = config.open().unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(temp_dir.path().join("store").is_dir());
    }

    #[cfg(not(feature = "s3"))]
    #[test]
    fn test_disabled_backend_is_config_error() {
        let config = StorageConfig::S3(S3Config {
            bucket: "b".into(),
            region: "us-east-1".into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
        });
        let err = config.open().err().unwrap();
        assert!(matches!(err, DvomError::Config(_)));
    }
}
