//! CLI command handlers
//!
//! This module contains the implementation of CLI commands, bridging the
//! clap argument parsing with the backup pipelines and the snapshot store.
//! Each invocation builds one [`Context`] from the global flags and the
//! persisted settings; nothing is kept in global state.

pub mod backup;
pub mod config;
pub mod restore;
pub mod snapshot;
pub mod volumes;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::backup::{Cancellation, PipelineConfig};
use crate::config::{paths::DvomPaths, settings::Settings};
use crate::crypto::SecureString;
use crate::error::{DvomError, DvomResult};
use crate::storage::{
    BackendKind, GcsConfig, LocalConfig, ObjectStore, S3Config, SnapshotStorage, StorageConfig,
};

pub use backup::{handle_backup_command, BackupArgs};
pub use config::{handle_config_command, ConfigCommands};
pub use restore::{handle_restore_command, RestoreArgs};
pub use snapshot::{
    handle_delete_command, handle_info_command, handle_list_command, handle_versions_command,
    DeleteArgs, InfoArgs, ListArgs, VersionsArgs,
};
pub use volumes::{handle_volumes_command, VolumesArgs};

/// Storage backend selection, shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    /// Storage backend [default: from config, else local]
    #[arg(long = "storage", value_enum, global = true)]
    pub kind: Option<BackendKind>,

    /// Directory to store backups (local storage)
    #[arg(long, global = true, value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    /// S3 bucket name
    #[arg(long, global = true)]
    pub s3_bucket: Option<String>,

    /// S3 region [default: us-east-1]
    #[arg(long, global = true)]
    pub s3_region: Option<String>,

    /// S3 endpoint (for S3-compatible services)
    #[arg(long, global = true, value_name = "URL")]
    pub s3_endpoint: Option<String>,

    /// S3 access key
    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub s3_access_key: Option<String>,

    /// S3 secret key
    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    /// GCS bucket name
    #[arg(long, global = true)]
    pub gcs_bucket: Option<String>,

    /// GCS endpoint (for emulators)
    #[arg(long, global = true, value_name = "URL")]
    pub gcs_endpoint: Option<String>,

    /// GCS OAuth access token
    #[arg(long, global = true, env = "GCS_ACCESS_TOKEN", hide_env_values = true)]
    pub gcs_token: Option<String>,

    /// File holding a GCS access token, bare or as JSON with `access_token`
    #[arg(long, global = true, value_name = "FILE")]
    pub gcs_creds: Option<PathBuf>,
}

impl StorageArgs {
    /// Resolve the backend from these flags, falling back to `settings`
    pub fn to_config(&self, settings: &Settings, paths: &DvomPaths) -> DvomResult<StorageConfig> {
        let defaults = &settings.storage;
        let kind = self.kind.unwrap_or(defaults.kind);

        match kind {
            BackendKind::Local => Ok(StorageConfig::Local(LocalConfig {
                base_path: self
                    .backup_dir
                    .clone()
                    .unwrap_or_else(|| settings.local_backup_dir(paths)),
            })),
            BackendKind::S3 => {
                let bucket = self
                    .s3_bucket
                    .clone()
                    .or_else(|| defaults.s3_bucket.clone())
                    .ok_or_else(|| {
                        DvomError::Validation("--s3-bucket is required for S3 storage".into())
                    })?;
                Ok(StorageConfig::S3(S3Config {
                    bucket,
                    region: self
                        .s3_region
                        .clone()
                        .unwrap_or_else(|| defaults.s3_region.clone()),
                    endpoint: self.s3_endpoint.clone().or_else(|| defaults.s3_endpoint.clone()),
                    access_key: self.s3_access_key.clone(),
                    secret_key: self.s3_secret_key.as_deref().map(SecureString::from),
                }))
            }
            BackendKind::Gcs => {
                let bucket = self
                    .gcs_bucket
                    .clone()
                    .or_else(|| defaults.gcs_bucket.clone())
                    .ok_or_else(|| {
                        DvomError::Validation("--gcs-bucket is required for GCS storage".into())
                    })?;
                Ok(StorageConfig::Gcs(GcsConfig {
                    bucket,
                    endpoint: self
                        .gcs_endpoint
                        .clone()
                        .or_else(|| defaults.gcs_endpoint.clone()),
                    token: match &self.gcs_creds {
                        Some(path) => Some(read_gcs_token(path)?),
                        None => self.gcs_token.as_deref().map(SecureString::from),
                    },
                }))
            }
        }
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    access_token: Option<String>,
}

/// Read the access token named by `--gcs-creds`
///
/// Service-account keys are rejected: turning one into a token means
/// signing a JWT, which dvom does not do.
fn read_gcs_token(path: &Path) -> DvomResult<SecureString> {
    let contents = fs::read_to_string(path).map_err(|e| {
        DvomError::Config(format!(
            "Failed to read GCS credentials {}: {}",
            path.display(),
            e
        ))
    })?;
    let contents = contents.trim();
    if contents.is_empty() {
        return Err(DvomError::Config(format!(
            "GCS credentials file is empty: {}",
            path.display()
        )));
    }
    if !contents.starts_with('{') {
        return Ok(SecureString::from(contents));
    }

    let creds: CredentialsFile = serde_json::from_str(contents).map_err(|e| {
        DvomError::Config(format!(
            "Failed to parse GCS credentials {}: {}",
            path.display(),
            e
        ))
    })?;
    match creds {
        CredentialsFile {
            access_token: Some(token),
            ..
        } => Ok(SecureString::from(token)),
        CredentialsFile {
            kind: Some(kind), ..
        } if kind == "service_account" => Err(DvomError::Config(format!(
            "{} is a service account key; pass an access token instead \
             (for example from `gcloud auth print-access-token`)",
            path.display()
        ))),
        _ => Err(DvomError::Config(format!(
            "No access_token in GCS credentials {}",
            path.display()
        ))),
    }
}

/// Everything a command needs, resolved once per invocation
pub struct Context {
    pub paths: DvomPaths,
    pub settings: Settings,
    pub storage: StorageArgs,
    /// Deadline for the whole command
    pub timeout: Option<Duration>,
}

impl Context {
    pub fn new(
        paths: DvomPaths,
        settings: Settings,
        storage: StorageArgs,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            paths,
            settings,
            storage,
            timeout,
        }
    }

    pub fn storage_config(&self) -> DvomResult<StorageConfig> {
        self.storage.to_config(&self.settings, &self.paths)
    }

    /// Open the configured backend wrapped in the versioning layer
    pub fn snapshots(&self) -> DvomResult<SnapshotStorage<Box<dyn ObjectStore>>> {
        let config = self.storage_config()?;
        tracing::debug!(backend = %config.kind(), "Opening storage backend");
        Ok(SnapshotStorage::new(config.open()?))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let cancellation = match self.timeout {
            Some(timeout) => Cancellation::with_timeout(timeout),
            None => Cancellation::new(),
        };
        PipelineConfig::from_settings(&self.settings.pipeline).with_cancellation(cancellation)
    }
}

/// Split repeated and comma-separated container lists into single names
pub(crate) fn container_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}
