//! Restore pipeline
//!
//! Stages, in order: validate the target volume, download the snapshot,
//! decrypt it into a local temp file, inspect the archive, ask for
//! confirmation, stop the requested containers, extract into the volume in
//! a sandbox, restart the containers.
//!
//! Everything that can fail because of the snapshot itself (wrong password,
//! tampering, a bad archive, the size cap) happens before any container is
//! stopped or any byte of the volume is touched.

use std::io::{self, BufReader};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::limits::LimitedWriter;
use super::prompt::Prompter;
use super::sandbox::{self, ArchiveSummary};
use super::stage::{RestoreStage, StageLog};
use super::PipelineConfig;
use crate::containers::{ContainerEngine, ContainerSafety};
use crate::crypto::{self, Peeked, SecureString};
use crate::display::format_size;
use crate::error::{DvomError, DvomResult};
use crate::storage::snapshot::{versioned_key, with_version};
use crate::storage::{Backup, BackupMetadata, ObjectStore, SnapshotStorage};

/// What to restore, and where
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    /// `name` or `name@version`
    pub snapshot: String,
    /// Version token; alternative to `name@version`
    pub version: Option<String>,
    pub target_volume: String,
    /// Describe the restore without changing anything
    pub dry_run: bool,
    /// Skip the confirmation prompt
    pub force: bool,
    /// Prompted for when the snapshot is encrypted and this is `None`
    pub password: Option<SecureString>,
    pub stop_containers: Vec<String>,
}

impl RestoreRequest {
    /// The snapshot reference with any separate version folded in
    pub fn snapshot_ref(&self) -> DvomResult<String> {
        with_version(&self.snapshot, self.version.as_deref())
    }
}

/// What a restore would do
#[derive(Debug, Clone, Serialize)]
pub struct RestorePlan {
    pub snapshot: String,
    pub version: String,
    pub source_volume: String,
    pub target_volume: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub encrypted: bool,
    pub stop_containers: Vec<String>,
}

impl RestorePlan {
    fn new(metadata: &BackupMetadata, request: &RestoreRequest) -> Self {
        Self {
            snapshot: metadata.name.clone(),
            version: metadata.version.clone(),
            source_volume: metadata.volume_name.clone(),
            target_volume: request.target_volume.clone(),
            size: metadata.size,
            created_at: metadata.created_at,
            description: metadata.description.clone(),
            encrypted: metadata.encrypted,
            stop_containers: request.stop_containers.clone(),
        }
    }

    pub fn versioned_name(&self) -> String {
        versioned_key(&self.snapshot, &self.version)
    }

    pub fn describe(&self) -> String {
        let mut lines = vec![
            format!("Snapshot:       {}", self.versioned_name()),
            format!("Created:        {}", self.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
            format!("Size:           {}", format_size(self.size)),
            format!("Encrypted:      {}", if self.encrypted { "yes" } else { "no" }),
        ];
        if !self.source_volume.is_empty() {
            lines.push(format!("Source volume:  {}", self.source_volume));
        }
        lines.push(format!("Target volume:  {}", self.target_volume));
        if !self.stop_containers.is_empty() {
            lines.push(format!("Stop:           {}", self.stop_containers.join(", ")));
        }
        if !self.description.is_empty() {
            lines.push(format!("Description:    {}", self.description));
        }
        lines.join("\n")
    }

    fn confirmation_message(&self) -> String {
        format!(
            "This will replace ALL data in volume '{}' with snapshot {}. Continue?",
            self.target_volume,
            self.versioned_name()
        )
    }
}

/// Result of a completed restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub plan: RestorePlan,
    pub archive: ArchiveSummary,
    pub stopped_containers: Vec<String>,
    pub stages: Vec<RestoreStage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restart_failures: Vec<String>,
    #[serde(skip)]
    pub duration: Duration,
}

impl RestoreReport {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Restored {} into volume '{}' ({} files, {}) in {:.1}s",
            self.plan.versioned_name(),
            self.plan.target_volume,
            self.archive.files,
            format_size(self.archive.unpacked_bytes),
            self.duration.as_secs_f64()
        );
        for failure in &self.restart_failures {
            summary.push_str("\nWarning: ");
            summary.push_str(failure);
        }
        summary
    }
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Restored(RestoreReport),
    /// `dry_run` was set; nothing changed
    DryRun(RestorePlan),
    /// The user answered no; nothing changed
    Declined(RestorePlan),
}

/// Runs restores against one engine and one snapshot store
pub struct RestoreManager<'a, S> {
    engine: &'a dyn ContainerEngine,
    snapshots: &'a SnapshotStorage<S>,
    prompter: &'a dyn Prompter,
    config: PipelineConfig,
}

impl<'a, S: ObjectStore> RestoreManager<'a, S> {
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

    /// Resolve the snapshot and target without downloading anything
    pub fn plan(&self, request: &RestoreRequest) -> DvomResult<RestorePlan> {
        self.require_volume(&request.target_volume)?;
        let metadata = self.snapshots.get_metadata(&request.snapshot_ref()?)?;
        Ok(RestorePlan::new(&metadata, request))
    }

    pub fn restore(&self, request: &RestoreRequest) -> DvomResult<RestoreOutcome> {
        if request.dry_run {
            return self.plan(request).map(RestoreOutcome::DryRun);
        }

        let started = Instant::now();
        self.require_volume(&request.target_volume)?;
        let reference = request.snapshot_ref()?;
        let mut stages = StageLog::new(&request.target_volume);

        stages.enter(RestoreStage::Downloading);
        let backup = self.snapshots.get_snapshot(&reference)?;
        let plan = RestorePlan::new(&backup.metadata, request);
        self.config.cancellation.check()?;

        let (staged, size) = self.stage_archive(backup, request, &mut stages)?;

        stages.enter(RestoreStage::Inspecting);
        let archive = sandbox::inspect_archive(
            BufReader::new(reopen(&staged)?),
            self.config.max_copy_size,
            &self.config.cancellation,
        )?;
        info!(
            entries = archive.entries,
            bytes = archive.unpacked_bytes,
            "Archive verified"
        );

        if !request.force {
            stages.enter(RestoreStage::Confirmation);
            if !self.prompter.confirm(&plan.confirmation_message())? {
                info!(volume = %request.target_volume, "Restore declined");
                return Ok(RestoreOutcome::Declined(plan));
            }
        }
        self.config.cancellation.check()?;

        let safety = ContainerSafety::new(self.engine, self.config.stop_grace);
        let guard = safety.stop_containers(&request.stop_containers)?;
        let stopped: Vec<String> = guard
            .states()
            .iter()
            .filter(|s| s.was_running)
            .map(|s| s.name.clone())
            .collect();
        if !stopped.is_empty() {
            stages.enter(RestoreStage::ContainersStopped);
        }

        stages.enter(RestoreStage::Extracting);
        let result = reopen(&staged).and_then(|mut file| {
            sandbox::extract_into_volume(
                self.engine,
                &self.config,
                &request.target_volume,
                &mut file,
                size,
            )
        });

        let restart = guard.restart();
        if !stopped.is_empty() {
            stages.enter(RestoreStage::ContainersRestarted);
        }
        result.map_err(|e| e.with_restart_failures(restart.failures.clone()))?;
        stages.enter(RestoreStage::Done);

        info!(
            snapshot = %plan.versioned_name(),
            volume = %request.target_volume,
            "Restore complete"
        );
        Ok(RestoreOutcome::Restored(RestoreReport {
            plan,
            archive,
            stopped_containers: stopped,
            stages: stages.into_stages(),
            restart_failures: restart.failures,
            duration: started.elapsed(),
        }))
    }

    fn require_volume(&self, name: &str) -> DvomResult<()> {
        if name.trim().is_empty() {
            return Err(DvomError::Validation("target volume is required".into()));
        }
        self.engine
            .inspect_volume(name)?
            .map(|_| ())
            .ok_or_else(|| DvomError::volume_not_found(name))
    }

    fn password(&self, request: &RestoreRequest) -> DvomResult<SecureString> {
        let password = match &request.password {
            Some(password) => password.clone(),
            None => self.prompter.password("Enter decryption password: ")?,
        };
        if password.is_empty() {
            return Err(DvomError::Validation("decryption password cannot be empty".into()));
        }
        Ok(password)
    }

    /// Write the plaintext archive to a temp file; returns it with its size
    fn stage_archive(
        &self,
        backup: Backup,
        request: &RestoreRequest,
        stages: &mut StageLog<RestoreStage>,
    ) -> DvomResult<(NamedTempFile, u64)> {
        let Backup { metadata, data, .. } = backup;
        let mut staged = NamedTempFile::new()
            .map_err(|e| DvomError::Io(format!("Failed to create staging file: {}", e)))?;

        let size = {
            let mut sink = LimitedWriter::new(
                staged.as_file_mut(),
                self.config.max_copy_size,
                self.config.cancellation.clone(),
            );
            match crypto::peek(data)? {
                Peeked::Encrypted(header, ciphertext) => {
                    if !metadata.encrypted {
                        warn!(snapshot = %metadata.id, "Snapshot is encrypted but not marked as such");
                    }
                    let password = self.password(request)?;
                    stages.enter(RestoreStage::Decrypting);
                    let mut plaintext = crypto::decrypt(ciphertext, password.as_str(), &header)?;
                    io::copy(&mut plaintext, &mut sink)?
                }
                Peeked::Plain(mut plain) => {
                    if metadata.encrypted {
                        return Err(DvomError::Corrupted(format!(
                            "{} is marked as encrypted but has no encryption header",
                            metadata.id
                        )));
                    }
                    io::copy(&mut plain, &mut sink)?
                }
            }
        };

        Ok((staged, size))
    }
}

fn reopen(staged: &NamedTempFile) -> DvomResult<std::fs::File> {
    staged
        .reopen()
        .map_err(|e| DvomError::Io(format!("Failed to reopen staging file: {}", e)))
}
