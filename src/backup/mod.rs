//! Volume backup and restore pipelines
//!
//! # Architecture
//!
//! - `BackupManager`: stop containers, archive the volume in a sandbox,
//!   optionally encrypt, upload as a new snapshot version, restart
//! - `RestoreManager`: download, decrypt, inspect, confirm, stop
//!   containers, extract into the volume in a sandbox, restart
//! - `sandbox`: the throwaway containers that do the archiving
//! - `limits`: size caps and cancellation for every streamed copy
//!
//! Both pipelines restart the containers they stopped on every exit path.
//! A restart failure never hides the pipeline's own result: it is appended
//! to the report on success and to the error on failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use dvom::backup::{BackupManager, BackupRequest, PipelineConfig, TerminalPrompter};
//! use dvom::containers::DockerCli;
//! use dvom::storage::{LocalStorage, SnapshotStorage};
//!
//! let engine = DockerCli::new();
//! let snapshots = SnapshotStorage::new(LocalStorage::new("/var/backups/dvom")?);
//! let manager = BackupManager::new(&engine, &snapshots, &TerminalPrompter, PipelineConfig::default());
//!
//! let report = manager.backup(&BackupRequest {
//!     volume: "pgdata".into(),
//!     stop_containers: vec!["postgres".into()],
//!     ..Default::default()
//! })?;
//! println!("{}", report.summary());
//! ```

pub mod limits;
pub mod manager;
pub mod prompt;
pub mod restore;
pub mod sandbox;
pub mod stage;

use std::time::Duration;

use crate::config::settings::PipelineSettings;
use crate::containers::DEFAULT_STOP_GRACE;

pub use limits::{Cancellation, DEFAULT_MAX_COPY_SIZE};
pub use manager::{BackupManager, BackupReport, BackupRequest};
pub use prompt::{Prompter, TerminalPrompter};
pub use restore::{RestoreManager, RestoreOutcome, RestorePlan, RestoreReport, RestoreRequest};
pub use sandbox::ArchiveSummary;
pub use stage::{BackupStage, RestoreStage};

/// Knobs shared by both pipelines
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Image for archive/extract sandboxes
    pub sandbox_image: String,
    /// Hard cap on bytes per copy or extraction
    pub max_copy_size: u64,
    /// Grace period for `docker stop`
    pub stop_grace: Duration,
    pub cancellation: Cancellation,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sandbox_image: "alpine:latest".to_string(),
            max_copy_size: DEFAULT_MAX_COPY_SIZE,
            stop_grace: DEFAULT_STOP_GRACE,
            cancellation: Cancellation::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            sandbox_image: settings.sandbox_image.clone(),
            max_copy_size: settings.max_copy_size,
            stop_grace: Duration::from_secs(settings.stop_timeout_secs),
            cancellation: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}
