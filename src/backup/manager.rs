//! Backup pipeline
//!
//! Stages, in order: validate the volume and obtain the password, stop the
//! requested containers, archive the volume in a read-only sandbox into a
//! local temp file, encrypt while uploading, restart the containers.
//! Nothing is stopped until the inputs have been validated.

use std::io::{Cursor, Read};
use std::time::{Duration, Instant};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use super::limits::LimitedReader;
use super::prompt::Prompter;
use super::sandbox;
use super::stage::{BackupStage, StageLog};
use super::PipelineConfig;
use crate::containers::{ContainerEngine, ContainerSafety};
use crate::crypto::{self, encrypted_size, SecureString};
use crate::display::format_size;
use crate::error::{DvomError, DvomResult};
use crate::storage::snapshot::{clean_snapshot_name, SNAPSHOT_TYPE, VERSION_SEPARATOR};
use crate::storage::{Backup, BackupMetadata, DataReader, ObjectStore, SnapshotStorage};

/// What to back up
#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub volume: String,
    /// Snapshot name; defaults to the volume name
    pub name: Option<String>,
    pub description: Option<String>,
    pub encrypt: bool,
    /// Prompted for when `encrypt` is set and this is `None`
    pub password: Option<SecureString>,
    /// Containers to stop while the volume is archived
    pub stop_containers: Vec<String>,
}

impl BackupRequest {
    /// The snapshot name, defaulting to the volume name
    pub fn snapshot_name(&self) -> String {
        clean_snapshot_name(self.name.as_deref().unwrap_or(&self.volume))
    }
}

/// Result of a successful backup
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub snapshot: String,
    pub version: String,
    pub volume: String,
    /// Size of the tar.gz archive
    pub archive_size: u64,
    /// Size of the stored object, header and tags included
    pub stored_size: u64,
    pub encrypted: bool,
    pub stopped_containers: Vec<String>,
    pub stages: Vec<BackupStage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restart_failures: Vec<String>,
    #[serde(skip)]
    pub duration: Duration,
}

impl BackupReport {
    /// `name@version`
    pub fn versioned_name(&self) -> String {
        format!("{}{}{}", self.snapshot, VERSION_SEPARATOR, self.version)
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Backed up volume '{}' to {} ({}{}) in {:.1}s",
            self.volume,
            self.versioned_name(),
            format_size(self.stored_size),
            if self.encrypted { ", encrypted" } else { "" },
            self.duration.as_secs_f64()
        );
        for failure in &self.restart_failures {
            summary.push_str("\nWarning: ");
            summary.push_str(failure);
        }
        summary
    }
}

/// Runs backups against one engine and one snapshot store
pub struct BackupManager<'a, S> {
    engine: &'a dyn ContainerEngine,
    snapshots: &'a SnapshotStorage<S>,
    prompter: &'a dyn Prompter,
    config: PipelineConfig,
}

impl<'a, S: ObjectStore> BackupManager<'a, S> {
    pub fn new(
        engine: &'a dyn ContainerEngine,
        snapshots: &'a SnapshotStorage<S>,
        prompter: &'a dyn Prompter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            engine,
            snapshots,
            prompter,
            config,
        }
    }

    pub fn backup(&self, request: &BackupRequest) -> DvomResult<BackupReport> {
        let started = Instant::now();
        let name = self.validate(request)?;
        let password = if request.encrypt {
            Some(self.password(request)?)
        } else {
            None
        };
        self.config.cancellation.check()?;

        let mut stages = StageLog::new(&request.volume);
        let safety = ContainerSafety::new(self.engine, self.config.stop_grace);
        let guard = safety.stop_containers(&request.stop_containers)?;
        let stopped: Vec<String> = guard
            .states()
            .iter()
            .filter(|s| s.was_running)
            .map(|s| s.name.clone())
            .collect();
        if !stopped.is_empty() {
            stages.enter(BackupStage::ContainersStopped);
        }

        let result = self.archive_and_upload(request, &name, password.as_ref(), &mut stages);

        let restart = guard.restart();
        if !stopped.is_empty() {
            stages.enter(BackupStage::ContainersRestarted);
        }
        let (version, archive_size, stored_size) =
            result.map_err(|e| e.with_restart_failures(restart.failures.clone()))?;
        stages.enter(BackupStage::Done);

        info!(snapshot = %name, version = %version, size = stored_size, "Backup complete");
        Ok(BackupReport {
            snapshot: name,
            version,
            volume: request.volume.clone(),
            archive_size,
            stored_size,
            encrypted: password.is_some(),
            stopped_containers: stopped,
            stages: stages.into_stages(),
            restart_failures: restart.failures,
            duration: started.elapsed(),
        })
    }

    /// Checks that need no side effects; returns the snapshot name
    fn validate(&self, request: &BackupRequest) -> DvomResult<String> {
        if request.volume.trim().is_empty() {
            return Err(DvomError::Validation("volume name is required".into()));
        }
        let name = request.snapshot_name();
        if name.is_empty() {
            return Err(DvomError::Validation("snapshot name is required".into()));
        }
        if name.contains(VERSION_SEPARATOR) {
            return Err(DvomError::Validation(format!(
                "snapshot name cannot contain '{}': {}",
                VERSION_SEPARATOR, name
            )));
        }
        self.engine
            .inspect_volume(&request.volume)?
            .ok_or_else(|| DvomError::volume_not_found(&request.volume))?;
        Ok(name)
    }

    fn password(&self, request: &BackupRequest) -> DvomResult<SecureString> {
        let password = match &request.password {
            Some(password) => password.clone(),
            None => self.prompter.new_password("Enter encryption password: ")?,
        };
        if password.is_empty() {
            return Err(DvomError::Validation("encryption password cannot be empty".into()));
        }
        Ok(password)
    }

    /// Returns (version, archive size, stored size)
    fn archive_and_upload(
        &self,
        request: &BackupRequest,
        name: &str,
        password: Option<&SecureString>,
        stages: &mut StageLog<BackupStage>,
    ) -> DvomResult<(String, u64, u64)> {
        stages.enter(BackupStage::Archiving);
        let mut archive = NamedTempFile::new()
            .map_err(|e| DvomError::Io(format!("Failed to create archive file: {}", e)))?;
        let archive_size = sandbox::archive_volume(
            self.engine,
            &self.config,
            &request.volume,
            archive.as_file_mut(),
        )?;
        self.config.cancellation.check()?;

        let file = archive
            .reopen()
            .map_err(|e| DvomError::Io(format!("Failed to reopen archive file: {}", e)))?;
        let source = LimitedReader::unbounded(file, self.config.cancellation.clone());

        let mut metadata = BackupMetadata::new(name, SNAPSHOT_TYPE);
        metadata.volume_name = request.volume.clone();
        metadata.description = request
            .description
            .clone()
            .unwrap_or_else(|| format!("Volume backup of {}", request.volume));
        metadata.encrypted = password.is_some();

        let (data, stored_size): (DataReader, u64) = match password {
            Some(password) => {
                stages.enter(BackupStage::Encrypting);
                let (ciphertext, header) = crypto::encrypt(source, password.as_str())?;
                let framed = Cursor::new(header.to_bytes().to_vec()).chain(ciphertext);
                (Box::new(framed), encrypted_size(archive_size))
            }
            None => (Box::new(source), archive_size),
        };
        metadata.size = stored_size;

        stages.enter(BackupStage::Uploading);
        let version = self
            .snapshots
            .store_snapshot(name, Backup::new(name, metadata, data))?;
        Ok((version, archive_size, stored_size))
    }
}
