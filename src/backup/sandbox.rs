//! Sandbox containers that archive or repopulate a volume
//!
//! A sandbox is a throwaway container from a small image with the target
//! volume mounted at `/data`. Archiving mounts it read-only and runs
//! `tar czf`; extraction mounts it read-write, wipes it and untars into it.
//! The sandbox is force-removed when the [`Sandbox`] handle drops, whatever
//! happened in between.

use std::io::{Read, Write};
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use serde::Serialize;
use tracing::{debug, warn};

use super::limits::{Cancellation, LimitedReader, LimitedWriter};
use super::PipelineConfig;
use crate::containers::engine::short_id;
use crate::containers::{ContainerEngine, SandboxSpec};
use crate::error::{DvomError, DvomResult};

/// Where the volume is mounted inside a sandbox
pub const MOUNT_POINT: &str = "/data";

/// File name of the archive inside a sandbox
pub const ARCHIVE_NAME: &str = "backup.tar.gz";

/// Absolute path of the archive inside a sandbox
pub const ARCHIVE_PATH: &str = "/backup.tar.gz";

fn archive_command() -> Vec<String> {
    ["tar", "czf", ARCHIVE_PATH, "-C", MOUNT_POINT, "."]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Removes dotfiles too, but never `.` or `..`
fn extract_command() -> Vec<String> {
    let script = format!(
        "rm -rf {m}/* {m}/.[!.]* {m}/..?* && cd {m} && tar xzf {a}",
        m = MOUNT_POINT,
        a = ARCHIVE_PATH
    );
    vec!["sh".into(), "-c".into(), script]
}

/// A created sandbox container, removed on drop
pub struct Sandbox<'a> {
    engine: &'a dyn ContainerEngine,
    id: String,
}

impl<'a> Sandbox<'a> {
    pub fn create(engine: &'a dyn ContainerEngine, spec: &SandboxSpec) -> DvomResult<Self> {
        let id = engine.create_sandbox(spec)?;
        debug!(sandbox = %short_id(&id), volume = %spec.volume, "Created sandbox");
        Ok(Self { engine, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run to completion; a non-zero exit is an error carrying the logs
    pub fn run(&self) -> DvomResult<()> {
        let exit = self.engine.run_sandbox(&self.id)?;
        if !exit.success() {
            return Err(DvomError::Sandbox(format!(
                "sandbox exited with code {}: {}",
                exit.code,
                exit.logs.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for Sandbox<'_> {
    fn drop(&mut self) {
        match self.engine.remove_sandbox(&self.id) {
            Ok(()) => debug!(sandbox = %short_id(&self.id), "Removed sandbox"),
            Err(e) => warn!(sandbox = %short_id(&self.id), error = %e, "Failed to remove sandbox"),
        }
    }
}

/// Archive `volume` as tar.gz into `sink`; returns the archive size
pub fn archive_volume(
    engine: &dyn ContainerEngine,
    config: &PipelineConfig,
    volume: &str,
    sink: &mut dyn Write,
) -> DvomResult<u64> {
    let sandbox = Sandbox::create(
        engine,
        &SandboxSpec {
            image: config.sandbox_image.clone(),
            volume: volume.to_string(),
            mount_point: MOUNT_POINT.to_string(),
            read_only: true,
            command: archive_command(),
        },
    )?;
    sandbox.run()?;
    config.cancellation.check()?;

    let mut limited = LimitedWriter::new(sink, config.max_copy_size, config.cancellation.clone());
    let size = engine.copy_from_sandbox(sandbox.id(), ARCHIVE_PATH, &mut limited)?;
    limited.flush()?;
    Ok(size)
}

/// Replace the contents of `volume` with the tar.gz read from `archive`
pub fn extract_into_volume(
    engine: &dyn ContainerEngine,
    config: &PipelineConfig,
    volume: &str,
    archive: &mut dyn Read,
    size: u64,
) -> DvomResult<()> {
    if size > config.max_copy_size {
        return Err(DvomError::ResourceLimit {
            limit: config.max_copy_size,
        });
    }

    let sandbox = Sandbox::create(
        engine,
        &SandboxSpec {
            image: config.sandbox_image.clone(),
            volume: volume.to_string(),
            mount_point: MOUNT_POINT.to_string(),
            read_only: false,
            command: extract_command(),
        },
    )?;

    let mut source = LimitedReader::new(archive, config.max_copy_size, config.cancellation.clone());
    engine.copy_into_sandbox(sandbox.id(), "/", ARCHIVE_NAME, &mut source, size)?;
    config.cancellation.check()?;
    sandbox.run()
}

/// What a tar.gz archive contains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub entries: u64,
    pub files: u64,
    /// Sum of the entry sizes
    pub unpacked_bytes: u64,
}

fn unreadable(e: std::io::Error) -> DvomError {
    match DvomError::from(e) {
        DvomError::Io(msg) => DvomError::Corrupted(format!("archive is not a readable tar.gz: {}", msg)),
        other => other,
    }
}

fn escapes_root(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Walk a tar.gz without unpacking it
///
/// Fails with ResourceLimit once more than `limit` bytes have been
/// decompressed or declared by entry headers, and with Corrupted for
/// streams that are not tar.gz or entries that point outside the volume.
pub fn inspect_archive<R: Read>(
    reader: R,
    limit: u64,
    cancellation: &Cancellation,
) -> DvomResult<ArchiveSummary> {
    let decompressed = LimitedReader::new(GzDecoder::new(reader), limit, cancellation.clone());
    let mut archive = tar::Archive::new(decompressed);
    let mut summary = ArchiveSummary::default();

    for entry in archive.entries().map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path().map_err(unreadable)?.into_owned();
        if escapes_root(&path) {
            return Err(DvomError::Corrupted(format!(
                "archive entry escapes the volume: {}",
                path.display()
            )));
        }

        let size = entry.header().size().map_err(unreadable)?;
        summary.entries += 1;
        if entry.header().entry_type().is_file() {
            summary.files += 1;
        }
        summary.unpacked_bytes = summary.unpacked_bytes.saturating_add(size);
        if summary.unpacked_bytes > limit {
            return Err(DvomError::ResourceLimit { limit });
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tar_gz, FakeEngine};
    use std::io::Cursor;

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn test_archive_volume_round_trips_files() {
        let engine = FakeEngine::new()
            .with_file("data", "a.txt", b"alpha")
            .with_file("data", "dir/b.txt", b"beta");

        let mut archive = Vec::new();
        let size = archive_volume(&engine, &config(), "data", &mut archive).unwrap();
        assert_eq!(size, archive.len() as u64);

        let summary = inspect_archive(Cursor::new(&archive), u64::MAX, &Cancellation::new()).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.unpacked_bytes, 9);
        assert_eq!(engine.live_sandboxes(), 0);

        let created = engine.created_sandboxes();
        assert_eq!(created.len(), 1);
        assert!(created[0].read_only);
        assert_eq!(created[0].mount_point, "/data");
        assert_eq!(created[0].image, "alpine:latest");
    }

    #[test]
    fn test_archive_copy_respects_limit() {
        let big = vec![7u8; 64 * 1024];
        let engine = FakeEngine::new().with_file("data", "big.bin", &big);
        let config = PipelineConfig {
            max_copy_size: 16,
            ..config()
        };

        let err = archive_volume(&engine, &config, "data", &mut Vec::new()).unwrap_err();
        assert!(err.is_resource_limit());
        // sandbox removed even on failure
        assert_eq!(engine.live_sandboxes(), 0);
    }

    #[test]
    fn test_failed_sandbox_reports_logs() {
        let engine = FakeEngine::new().with_volume("data").fail_run(true);
        let err = archive_volume(&engine, &config(), "data", &mut Vec::new()).unwrap_err();
        match err {
            DvomError::Sandbox(msg) => assert!(msg.contains("simulated failure")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.live_sandboxes(), 0);
    }

    #[test]
    fn test_extract_replaces_volume_contents() {
        let engine = FakeEngine::new()
            .with_file("data", "stale.txt", b"old")
            .with_file("data", ".hidden", b"h");
        let archive = tar_gz(&[("fresh.txt", b"new")]);

        extract_into_volume(
            &engine,
            &config(),
            "data",
            &mut Cursor::new(&archive),
            archive.len() as u64,
        )
        .unwrap();

        let files = engine.volume_files("data");
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("fresh.txt").map(Vec::as_slice), Some(&b"new"[..]));
        assert!(!engine.created_sandboxes()[0].read_only);
        assert_eq!(engine.live_sandboxes(), 0);
    }

    #[test]
    fn test_extract_rejects_oversized_archive_up_front() {
        let engine = FakeEngine::new().with_file("data", "keep.txt", b"k");
        let config = PipelineConfig {
            max_copy_size: 4,
            ..config()
        };
        let err = extract_into_volume(&engine, &config, "data", &mut Cursor::new(vec![0u8; 8]), 8)
            .unwrap_err();
        assert!(err.is_resource_limit());
        assert!(engine.created_sandboxes().is_empty());
        assert_eq!(engine.volume_files("data").len(), 1);
    }

    #[test]
    fn test_inspect_caps_decompressed_size() {
        // highly compressible: tiny archive, large payload
        let zeros = vec![0u8; 1024 * 1024];
        let archive = tar_gz(&[("zeros.bin", &zeros)]);
        assert!(archive.len() < 16 * 1024);

        let err = inspect_archive(Cursor::new(&archive), 64 * 1024, &Cancellation::new()).unwrap_err();
        assert!(err.is_resource_limit());
    }

    #[test]
    fn test_inspect_rejects_garbage_and_escapes() {
        let err = inspect_archive(Cursor::new(b"definitely not gzip"), u64::MAX, &Cancellation::new())
            .unwrap_err();
        assert!(err.is_corrupted());

        assert!(escapes_root(Path::new("../etc/passwd")));
        assert!(escapes_root(Path::new("/etc/passwd")));
        assert!(!escapes_root(Path::new("./data/file")));
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            archive_command(),
            vec!["tar", "czf", "/backup.tar.gz", "-C", "/data", "."]
        );
        let extract = extract_command();
        assert_eq!(extract[0], "sh");
        assert!(extract[2].ends_with("tar xzf /backup.tar.gz"));
    }
}
