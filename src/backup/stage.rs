//! Pipeline stages
//!
//! Each pipeline records the stages it entered so reports (and tests) can
//! show how far an operation got.

use std::fmt;

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupStage {
    ContainersStopped,
    Archiving,
    Encrypting,
    Uploading,
    ContainersRestarted,
    Done,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ContainersStopped => "containers stopped",
            Self::Archiving => "archiving",
            Self::Encrypting => "encrypting",
            Self::Uploading => "uploading",
            Self::ContainersRestarted => "containers restarted",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestoreStage {
    Downloading,
    Decrypting,
    Inspecting,
    Confirmation,
    ContainersStopped,
    Extracting,
    ContainersRestarted,
    Done,
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Downloading => "downloading",
            Self::Decrypting => "decrypting",
            Self::Inspecting => "inspecting",
            Self::Confirmation => "confirmation",
            Self::ContainersStopped => "containers stopped",
            Self::Extracting => "extracting",
            Self::ContainersRestarted => "containers restarted",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Ordered log of the stages a pipeline run passed through
#[derive(Debug)]
pub(crate) struct StageLog<S> {
    volume: String,
    visited: Vec<S>,
}

impl<S: Copy + fmt::Display> StageLog<S> {
    pub fn new(volume: &str) -> Self {
        Self {
            volume: volume.to_string(),
            visited: Vec::new(),
        }
    }

    pub fn enter(&mut self, stage: S) {
        info!(volume = %self.volume, stage = %stage, "Pipeline stage");
        self.visited.push(stage);
    }

    pub fn into_stages(self) -> Vec<S> {
        self.visited
    }
}
