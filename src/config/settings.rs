//! User settings for dvom
//!
//! Persisted defaults for the storage backend and the backup pipeline.
//! Command-line flags override every value here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::DvomPaths;
use crate::error::DvomError;
use crate::storage::file_io::write_json_atomic;
use crate::storage::BackendKind;

/// Default storage backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Backend used when `--storage` is not given
    #[serde(default)]
    pub kind: BackendKind,

    /// Directory for the filesystem backend (defaults to `<config>/backups`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Custom endpoint for S3-compatible services (MinIO and friends)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_endpoint: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            local_path: None,
            s3_bucket: None,
            s3_region: default_s3_region(),
            s3_endpoint: None,
            gcs_bucket: None,
            gcs_endpoint: None,
        }
    }
}

/// Backup pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Image used for the archive/extract sandbox
    #[serde(default = "default_sandbox_image")]
    pub sandbox_image: String,

    /// Hard cap on bytes copied out of or extracted into a sandbox
    #[serde(default = "default_max_copy_size")]
    pub max_copy_size: u64,

    /// Grace period before a stopped container is killed
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sandbox_image: default_sandbox_image(),
            max_copy_size: default_max_copy_size(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// User settings for dvom
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

fn default_schema_version() -> u32 {
    1
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_sandbox_image() -> String {
    "alpine:latest".to_string()
}

fn default_max_copy_size() -> u64 {
    crate::backup::limits::DEFAULT_MAX_COPY_SIZE
}

fn default_stop_timeout_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            storage: StorageSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or fall back to defaults if the file doesn't exist
    pub fn load_or_create(paths: &DvomPaths) -> Result<Self, DvomError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| DvomError::Io(format!("Failed to read settings file: {}", e)))?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                DvomError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            Ok(settings)
        } else {
            // Don't save yet - `dvom config init` decides when to persist
            Ok(Settings::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, paths: &DvomPaths) -> Result<(), DvomError> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }

    /// Directory used by the filesystem backend
    pub fn local_backup_dir(&self, paths: &DvomPaths) -> PathBuf {
        self.storage
            .local_path
            .clone()
            .unwrap_or_else(|| paths.default_backup_dir())
    }
}
