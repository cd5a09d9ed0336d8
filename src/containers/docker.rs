//! Docker engine driven through the `docker` command line client
//!
//! Every operation is one `docker` invocation. Listings use the
//! `{{json .}}` format so each line decodes on its own. `docker cp` speaks
//! tar on stdin/stdout; the single file being moved is wrapped into or
//! unwrapped from that framing here.

use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::debug;

use super::engine::{ContainerEngine, ContainerSummary, SandboxExit, SandboxSpec, VolumeInfo};
use crate::error::{DvomError, DvomResult};

/// Overrides the `docker` binary
pub const DOCKER_BIN_ENV: &str = "DVOM_DOCKER";

/// Label put on every sandbox so leftovers can be found
pub const SANDBOX_LABEL: &str = "dvom.sandbox=true";

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeLine {
    name: String,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    mountpoint: String,
    #[serde(default)]
    created_at: Option<String>,
}

impl From<VolumeLine> for VolumeInfo {
    fn from(line: VolumeLine) -> Self {
        Self {
            name: line.name,
            driver: line.driver,
            mountpoint: line.mountpoint,
            created_at: line.created_at,
        }
    }
}

/// Parse `docker ps --format '{{json .}}'` output
pub(crate) fn parse_ps(stdout: &str) -> DvomResult<Vec<ContainerSummary>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let line: PsLine = serde_json::from_str(line).map_err(|e| {
                DvomError::Container(format!("Unexpected docker ps output: {}", e))
            })?;
            let running = if line.state.is_empty() {
                line.status.starts_with("Up")
            } else {
                line.state == "running"
            };
            Ok(ContainerSummary {
                id: line.id,
                names: line
                    .names
                    .split(',')
                    .map(|n| n.trim().trim_start_matches('/').to_string())
                    .filter(|n| !n.is_empty())
                    .collect(),
                image: line.image,
                running,
            })
        })
        .collect()
}

/// Parse `docker volume ls --format '{{json .}}'` output
pub(crate) fn parse_volume_ls(stdout: &str) -> DvomResult<Vec<VolumeInfo>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<VolumeLine>(line)
                .map(VolumeInfo::from)
                .map_err(|e| DvomError::Container(format!("Unexpected docker volume output: {}", e)))
        })
        .collect()
}

/// Parse `docker volume inspect` output (a JSON array)
pub(crate) fn parse_volume_inspect(stdout: &str) -> DvomResult<Option<VolumeInfo>> {
    let volumes: Vec<VolumeLine> = serde_json::from_str(stdout).map_err(|e| {
        DvomError::Container(format!("Unexpected docker volume inspect output: {}", e))
    })?;
    Ok(volumes.into_iter().next().map(VolumeInfo::from))
}

fn is_no_such(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such")
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Wait for a `docker cp` and read back what it wrote to stderr
fn finish_copy(mut child: Child, mut stderr: File) -> DvomResult<(ExitStatus, String)> {
    let status = child
        .wait()
        .map_err(|e| DvomError::Sandbox(format!("Failed to wait for docker cp: {}", e)))?;

    let mut captured = Vec::new();
    stderr
        .seek(SeekFrom::Start(0))
        .and_then(|_| stderr.read_to_end(&mut captured))
        .map_err(|e| DvomError::Sandbox(format!("Failed to read docker cp errors: {}", e)))?;
    Ok((status, String::from_utf8_lossy(&captured).trim().to_string()))
}

/// Recover adapter errors from a copy stream, otherwise blame the sandbox copy
fn copy_error(e: io::Error) -> DvomError {
    match DvomError::from(e) {
        DvomError::Io(msg) => DvomError::Sandbox(format!("Copy stream failed: {}", msg)),
        other => other,
    }
}

/// Copy the first regular file called `name` out of a tar stream
///
/// The rest of the stream is drained so the producer can exit cleanly.
fn untar_entry<R: Read>(reader: R, name: &str, sink: &mut dyn Write) -> DvomResult<Option<u64>> {
    let mut archive = tar::Archive::new(reader);
    let mut copied = None;
    for entry in archive.entries().map_err(copy_error)? {
        let mut entry = entry.map_err(copy_error)?;
        let matches = entry
            .path()
            .map_err(copy_error)?
            .file_name()
            .is_some_and(|n| n == name);
        if matches && entry.header().entry_type().is_file() {
            copied = Some(io::copy(&mut entry, &mut *sink).map_err(copy_error)?);
            break;
        }
    }
    io::copy(&mut archive.into_inner(), &mut io::sink()).map_err(copy_error)?;
    Ok(copied)
}

/// Wrap `size` bytes of `source` as the single entry `name` of a tar stream
fn tar_entry<W: Write>(writer: W, name: &str, source: &mut dyn Read, size: u64) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );

    let mut builder = tar::Builder::new(writer);
    builder.append_data(&mut header, name, source.take(size))?;
    builder.into_inner()?.flush()
}

/// [`ContainerEngine`] backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: OsString,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Use `$DVOM_DOCKER`, or `docker` from `PATH`
    pub fn new() -> Self {
        let binary = env::var_os(DOCKER_BIN_ENV).unwrap_or_else(|| OsString::from("docker"));
        Self { binary }
    }

    pub fn with_binary(binary: impl Into<OsString>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!(args = ?args, "docker");
        let mut command = Command::new(&self.binary);
        command.args(args);
        command
    }

    fn spawn_error(&self, e: io::Error) -> DvomError {
        DvomError::Container(format!(
            "Failed to run {}: {} (is Docker installed?)",
            Path::new(&self.binary).display(),
            e
        ))
    }

    /// Spawn `docker cp` with stderr going to an unnamed temp file
    ///
    /// The copy stream is read or written on this thread while the child
    /// runs, so stderr must not sit in a pipe nobody drains.
    fn spawn_copy(&self, args: &[&str], stdin: Stdio, stdout: Stdio) -> DvomResult<(Child, File)> {
        let stderr = tempfile::tempfile()
            .map_err(|e| DvomError::Sandbox(format!("Failed to create temp file: {}", e)))?;
        let child_stderr = stderr
            .try_clone()
            .map_err(|e| DvomError::Sandbox(format!("Failed to create temp file: {}", e)))?;
        let child = self
            .command(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::from(child_stderr))
            .spawn()
            .map_err(|e| self.spawn_error(e))?;
        Ok((child, stderr))
    }

    fn output(&self, args: &[&str]) -> DvomResult<Output> {
        self.command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))
    }

    /// Run and return stdout, mapping failure through `fail`
    fn run(&self, args: &[&str], fail: fn(String) -> DvomError) -> DvomResult<String> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(fail(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr_of(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Like [`run`](Self::run) but turns "no such container" into NotFound
    fn run_on_container(&self, args: &[&str], id: &str) -> DvomResult<String> {
        let output = self.output(args)?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = stderr_of(&output);
        if is_no_such(&stderr) {
            return Err(DvomError::container_not_found(id));
        }
        Err(DvomError::Container(format!(
            "docker {} {} failed: {}",
            args.first().copied().unwrap_or_default(),
            id,
            stderr
        )))
    }
}

impl ContainerEngine for DockerCli {
    fn list_containers(&self) -> DvomResult<Vec<ContainerSummary>> {
        let stdout = self.run(
            &["ps", "--all", "--no-trunc", "--format", "{{json .}}"],
            DvomError::Container,
        )?;
        parse_ps(&stdout)
    }

    fn is_running(&self, id: &str) -> DvomResult<bool> {
        let stdout =
            self.run_on_container(&["inspect", "--format", "{{.State.Running}}", id], id)?;
        Ok(stdout.trim() == "true")
    }

    fn stop_container(&self, id: &str, grace: Duration) -> DvomResult<()> {
        let grace = grace.as_secs().to_string();
        self.run_on_container(&["stop", "--time", &grace, id], id)?;
        Ok(())
    }

    fn start_container(&self, id: &str) -> DvomResult<()> {
        self.run_on_container(&["start", id], id)?;
        Ok(())
    }

    fn list_volumes(&self) -> DvomResult<Vec<VolumeInfo>> {
        let stdout = self.run(
            &["volume", "ls", "--format", "{{json .}}"],
            DvomError::Container,
        )?;
        parse_volume_ls(&stdout)
    }

    fn inspect_volume(&self, name: &str) -> DvomResult<Option<VolumeInfo>> {
        let output = self.output(&["volume", "inspect", name])?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_no_such(&stderr) {
                return Ok(None);
            }
            return Err(DvomError::Container(format!(
                "docker volume inspect {} failed: {}",
                name, stderr
            )));
        }
        parse_volume_inspect(&String::from_utf8_lossy(&output.stdout))
    }

    fn create_sandbox(&self, spec: &SandboxSpec) -> DvomResult<String> {
        let mut bind = format!("{}:{}", spec.volume, spec.mount_point);
        if spec.read_only {
            bind.push_str(":ro");
        }

        let mut args: Vec<&str> = vec![
            "create",
            "--label",
            SANDBOX_LABEL,
            "-v",
            bind.as_str(),
            spec.image.as_str(),
        ];
        args.extend(spec.command.iter().map(String::as_str));

        let stdout = self.run(&args, DvomError::Sandbox)?;
        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(DvomError::Sandbox("docker create returned no container id".into()));
        }
        Ok(id)
    }

    fn run_sandbox(&self, id: &str) -> DvomResult<SandboxExit> {
        self.run(&["start", id], DvomError::Sandbox)?;
        let stdout = self.run(&["wait", id], DvomError::Sandbox)?;
        let code = stdout.trim().parse::<i64>().map_err(|_| {
            DvomError::Sandbox(format!("Unexpected docker wait output: {}", stdout.trim()))
        })?;

        let logs = if code == 0 {
            String::new()
        } else {
            let output = self.output(&["logs", id])?;
            let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
            logs.push_str(&String::from_utf8_lossy(&output.stderr));
            logs
        };
        Ok(SandboxExit { code, logs })
    }

    fn copy_from_sandbox(&self, id: &str, path: &str, sink: &mut dyn Write) -> DvomResult<u64> {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DvomError::Sandbox(format!("Invalid sandbox path: {}", path)))?
            .to_string();
        let source = format!("{}:{}", id, path);

        let (mut child, stderr) =
            self.spawn_copy(&["cp", &source, "-"], Stdio::null(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DvomError::Sandbox("docker cp has no output stream".into()))?;

        let copied = untar_entry(stdout, &name, sink);
        if copied.is_err() {
            // ignore: the process may already have exited
            let _ = child.kill();
        }
        let (status, errors) = finish_copy(child, stderr)?;

        // Sink errors (limits, cancellation) win over the killed child's status
        let copied = match copied {
            Err(e) if !matches!(e, DvomError::Sandbox(_)) => return Err(e),
            other => other,
        };
        if !status.success() {
            return Err(DvomError::Sandbox(format!(
                "docker cp {} failed: {}",
                source, errors
            )));
        }
        copied?.ok_or_else(|| DvomError::Sandbox(format!("{} not found in copy stream", path)))
    }

    fn copy_into_sandbox(
        &self,
        id: &str,
        dest_dir: &str,
        name: &str,
        source: &mut dyn Read,
        size: u64,
    ) -> DvomResult<()> {
        let dest = format!("{}:{}", id, dest_dir);
        let (mut child, stderr) =
            self.spawn_copy(&["cp", "-", &dest], Stdio::piped(), Stdio::null())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DvomError::Sandbox("docker cp has no input stream".into()))?;

        let written = tar_entry(stdin, name, source, size).map_err(copy_error);
        if written.is_err() {
            let _ = child.kill();
        }
        let (status, errors) = finish_copy(child, stderr)?;

        let written = match written {
            Err(e) if !matches!(e, DvomError::Sandbox(_)) => return Err(e),
            other => other,
        };
        if !status.success() {
            return Err(DvomError::Sandbox(format!(
                "docker cp into {} failed: {}",
                dest, errors
            )));
        }
        written
    }

    fn remove_sandbox(&self, id: &str) -> DvomResult<()> {
        self.run(&["rm", "--force", id], DvomError::Sandbox)?;
        Ok(())
    }
}
