//! Container engine contract
//!
//! Everything dvom needs from a container runtime: looking up containers and
//! volumes, stopping and starting containers, and running short-lived sandbox
//! containers with a volume mounted. Copies in and out of a sandbox move a
//! single file; the engine hides whatever framing the runtime uses.

use std::io::{Read, Write};
use std::time::Duration;

use serde::Serialize;

use crate::error::DvomResult;

/// A container as listed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    /// Names without the leading `/`
    pub names: Vec<String>,
    pub image: String,
    pub running: bool,
}

impl ContainerSummary {
    /// First name, or the short id for unnamed containers
    pub fn display_name(&self) -> String {
        self.names
            .first()
            .cloned()
            .unwrap_or_else(|| short_id(&self.id).to_string())
    }
}

/// A named volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// How to create a sandbox container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub image: String,
    pub volume: String,
    pub mount_point: String,
    pub read_only: bool,
    pub command: Vec<String>,
}

/// Result of running a sandbox to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxExit {
    pub code: i64,
    pub logs: String,
}

impl SandboxExit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Operations dvom performs against a container runtime
pub trait ContainerEngine {
    fn list_containers(&self) -> DvomResult<Vec<ContainerSummary>>;

    fn is_running(&self, id: &str) -> DvomResult<bool>;

    /// Stop a container, killing it after `grace`
    fn stop_container(&self, id: &str, grace: Duration) -> DvomResult<()>;

    fn start_container(&self, id: &str) -> DvomResult<()>;

    fn list_volumes(&self) -> DvomResult<Vec<VolumeInfo>>;

    /// `None` when no volume has that name
    fn inspect_volume(&self, name: &str) -> DvomResult<Option<VolumeInfo>>;

    /// Create (but do not start) a sandbox; returns its id
    fn create_sandbox(&self, spec: &SandboxSpec) -> DvomResult<String>;

    /// Start a sandbox and wait for it to exit
    fn run_sandbox(&self, id: &str) -> DvomResult<SandboxExit>;

    /// Stream the file at `path` inside the sandbox into `sink`
    fn copy_from_sandbox(&self, id: &str, path: &str, sink: &mut dyn Write) -> DvomResult<u64>;

    /// Place `size` bytes from `source` at `dest_dir/name` inside the sandbox
    fn copy_into_sandbox(
        &self,
        id: &str,
        dest_dir: &str,
        name: &str,
        source: &mut dyn Read,
        size: u64,
    ) -> DvomResult<()>;

    /// Force-remove a sandbox
    fn remove_sandbox(&self, id: &str) -> DvomResult<()>;
}

impl<T: ContainerEngine + ?Sized> ContainerEngine for &T {
    fn list_containers(&self) -> DvomResult<Vec<ContainerSummary>> {
        (**self).list_containers()
    }

    fn is_running(&self, id: &str) -> DvomResult<bool> {
        (**self).is_running(id)
    }

    fn stop_container(&self, id: &str, grace: Duration) -> DvomResult<()> {
        (**self).stop_container(id, grace)
    }

    fn start_container(&self, id: &str) -> DvomResult<()> {
        (**self).start_container(id)
    }

    fn list_volumes(&self) -> DvomResult<Vec<VolumeInfo>> {
        (**self).list_volumes()
    }

    fn inspect_volume(&self, name: &str) -> DvomResult<Option<VolumeInfo>> {
        (**self).inspect_volume(name)
    }

    fn create_sandbox(&self, spec: &SandboxSpec) -> DvomResult<String> {
        (**self).create_sandbox(spec)
    }

    fn run_sandbox(&self, id: &str) -> DvomResult<SandboxExit> {
        (**self).run_sandbox(id)
    }

    fn copy_from_sandbox(&self, id: &str, path: &str, sink: &mut dyn Write) -> DvomResult<u64> {
        (**self).copy_from_sandbox(id, path, sink)
    }

    fn copy_into_sandbox(
        &self,
        id: &str,
        dest_dir: &str,
        name: &str,
        source: &mut dyn Read,
        size: u64,
    ) -> DvomResult<()> {
        (**self).copy_into_sandbox(id, dest_dir, name, source, size)
    }

    fn remove_sandbox(&self, id: &str) -> DvomResult<()> {
        (**self).remove_sandbox(id)
    }
}

impl<T: ContainerEngine + ?Sized> ContainerEngine for Box<T> {
    fn list_containers(&self) -> DvomResult<Vec<ContainerSummary>> {
        (**self).list_containers()
    }

    fn is_running(&self, id: &str) -> DvomResult<bool> {
        (**self).is_running(id)
    }

    fn stop_container(&self, id: &str, grace: Duration) -> DvomResult<()> {
        (**self).stop_container(id, grace)
    }

    fn start_container(&self, id: &str) -> DvomResult<()> {
        (**self).start_container(id)
    }

    fn list_volumes(&self) -> DvomResult<Vec<VolumeInfo>> {
        (**self).list_volumes()
    }

    fn inspect_volume(&self, name: &str) -> DvomResult<Option<VolumeInfo>> {
        (**self).inspect_volume(name)
    }

    fn create_sandbox(&self, spec: &SandboxSpec) -> DvomResult<String> {
        (**self).create_sandbox(spec)
    }

    fn run_sandbox(&self, id: &str) -> DvomResult<SandboxExit> {
        (**self).run_sandbox(id)
    }

    fn copy_from_sandbox(&self, id: &str, path: &str, sink: &mut dyn Write) -> DvomResult<u64> {
        (**self).copy_from_sandbox(id, path, sink)
    }

    fn copy_into_sandbox(
        &self,
        id: &str,
        dest_dir: &str,
        name: &str,
        source: &mut dyn Read,
        size: u64,
    ) -> DvomResult<()> {
        (**self).copy_into_sandbox(id, dest_dir, name, source, size)
    }

    fn remove_sandbox(&self, id: &str) -> DvomResult<()> {
        (**self).remove_sandbox(id)
    }
}

/// First 12 characters of a container id
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_display_name_falls_back_to_short_id() {
        let mut summary = ContainerSummary {
            id: "0123456789abcdef".into(),
            names: vec!["web".into()],
            image: "nginx".into(),
            running: true,
        };
        assert_eq!(summary.display_name(), "web");
        summary.names.clear();
        assert_eq!(summary.display_name(), "0123456789ab");
    }
}
