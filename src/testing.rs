//! Test doubles shared by unit tests
//!
//! [`FakeEngine`] keeps containers and volumes in memory. Volumes are maps
//! of relative path to contents. Sandboxes understand exactly the two
//! commands the pipelines issue: `tar czf` builds a real tar.gz of the
//! volume, `sh -c` wipes the volume and unpacks the copied-in archive.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::backup::prompt::Prompter;
use crate::backup::sandbox::ARCHIVE_PATH;
use crate::containers::{ContainerEngine, ContainerSummary, SandboxExit, SandboxSpec, VolumeInfo};
use crate::crypto::SecureString;
use crate::error::{DvomError, DvomResult};

type Files = BTreeMap<String, Vec<u8>>;

/// Build a tar.gz holding `files`
pub fn tar_gz<C: AsRef<[u8]>>(files: &[(&str, C)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in files {
        let contents: &[u8] = contents.as_ref();
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn untar_gz(archive: &[u8]) -> Result<Files, String> {
    let mut files = Files::new();
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| e.to_string())?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).map_err(|e| e.to_string())?;
        files.insert(path, contents);
    }
    Ok(files)
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    running: bool,
}

#[derive(Debug)]
struct FakeSandbox {
    spec: SandboxSpec,
    files: Files,
}

#[derive(Default)]
struct State {
    containers: Vec<FakeContainer>,
    volumes: BTreeMap<String, Files>,
    sandboxes: BTreeMap<String, FakeSandbox>,
    created: Vec<SandboxSpec>,
    events: Vec<String>,
    next_id: u32,
}

/// In-memory [`ContainerEngine`]
#[derive(Default)]
pub struct FakeEngine {
    state: RefCell<State>,
    fail_run: Cell<bool>,
    fail_stop: HashSet<String>,
    fail_start: HashSet<String>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, id: &str, name: &str, running: bool) -> Self {
        self.state.borrow_mut().containers.push(FakeContainer {
            id: id.to_string(),
            name: name.to_string(),
            running,
        });
        self
    }

    pub fn with_volume(self, name: &str) -> Self {
        self.state
            .borrow_mut()
            .volumes
            .entry(name.to_string())
            .or_default();
        self
    }

    pub fn with_file(self, volume: &str, path: &str, contents: impl AsRef<[u8]>) -> Self {
        self.set_file(volume, path, contents);
        self
    }

    /// Sandboxes exit non-zero
    pub fn fail_run(self, fail: bool) -> Self {
        self.fail_run.set(fail);
        self
    }

    pub fn set_fail_run(&self, fail: bool) {
        self.fail_run.set(fail);
    }

    pub fn fail_stop(mut self, id: &str) -> Self {
        self.fail_stop.insert(id.to_string());
        self
    }

    pub fn fail_start(mut self, id: &str) -> Self {
        self.fail_start.insert(id.to_string());
        self
    }

    pub fn set_file(&self, volume: &str, path: &str, contents: impl AsRef<[u8]>) {
        self.state
            .borrow_mut()
            .volumes
            .entry(volume.to_string())
            .or_default()
            .insert(path.to_string(), contents.as_ref().to_vec());
    }

    pub fn volume_files(&self, volume: &str) -> Files {
        self.state
            .borrow()
            .volumes
            .get(volume)
            .cloned()
            .unwrap_or_default()
    }

    /// Mutating calls in order, e.g. `stop c1`, `run sandbox-1`
    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    pub fn events_matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn live_sandboxes(&self) -> usize {
        self.state.borrow().sandboxes.len()
    }

    pub fn created_sandboxes(&self) -> Vec<SandboxSpec> {
        self.state.borrow().created.clone()
    }

    fn record(&self, event: String) {
        self.state.borrow_mut().events.push(event);
    }

    fn container(&self, id: &str) -> DvomResult<FakeContainer> {
        self.state
            .borrow()
            .containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DvomError::container_not_found(id))
    }

    fn set_running(&self, id: &str, running: bool) {
        if let Some(container) = self
            .state
            .borrow_mut()
            .containers
            .iter_mut()
            .find(|c| c.id == id)
        {
            container.running = running;
        }
    }

    fn execute(&self, sandbox: &FakeSandbox) -> Result<Option<Files>, String> {
        let volume = self.volume_files(&sandbox.spec.volume);
        match sandbox.spec.command.first().map(String::as_str) {
            Some("tar") => {
                let files: Vec<(&str, &Vec<u8>)> =
                    volume.iter().map(|(p, c)| (p.as_str(), c)).collect();
                let mut sandbox_files = Files::new();
                sandbox_files.insert(ARCHIVE_PATH.to_string(), tar_gz(&files));
                Ok(Some(sandbox_files))
            }
            Some("sh") => {
                if sandbox.spec.read_only {
                    return Err("sh: can't remove: Read-only file system".into());
                }
                let archive = sandbox
                    .files
                    .get(ARCHIVE_PATH)
                    .ok_or("tar: can't open '/backup.tar.gz': No such file or directory")?;
                let files = untar_gz(archive)?;
                self.state
                    .borrow_mut()
                    .volumes
                    .insert(sandbox.spec.volume.clone(), files);
                Ok(None)
            }
            other => Err(format!("unknown command {:?}", other)),
        }
    }
}

impl ContainerEngine for FakeEngine {
    fn list_containers(&self) -> DvomResult<Vec<ContainerSummary>> {
        Ok(self
            .state
            .borrow()
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                image: "fake".into(),
                running: c.running,
            })
            .collect())
    }

    fn is_running(&self, id: &str) -> DvomResult<bool> {
        Ok(self.container(id)?.running)
    }

    fn stop_container(&self, id: &str, _grace: Duration) -> DvomResult<()> {
        self.container(id)?;
        self.record(format!("stop {}", id));
        if self.fail_stop.contains(id) {
            return Err(DvomError::Container(format!("cannot stop {}", id)));
        }
        self.set_running(id, false);
        Ok(())
    }

    fn start_container(&self, id: &str) -> DvomResult<()> {
        self.container(id)?;
        self.record(format!("start {}", id));
        if self.fail_start.contains(id) {
            return Err(DvomError::Container(format!("cannot start {}", id)));
        }
        self.set_running(id, true);
        Ok(())
    }

    fn list_volumes(&self) -> DvomResult<Vec<VolumeInfo>> {
        Ok(self
            .state
            .borrow()
            .volumes
            .keys()
            .map(|name| fake_volume(name))
            .collect())
    }

    fn inspect_volume(&self, name: &str) -> DvomResult<Option<VolumeInfo>> {
        Ok(self
            .state
            .borrow()
            .volumes
            .contains_key(name)
            .then(|| fake_volume(name)))
    }

    fn create_sandbox(&self, spec: &SandboxSpec) -> DvomResult<String> {
        let mut state = self.state.borrow_mut();
        if !state.volumes.contains_key(&spec.volume) {
            return Err(DvomError::Sandbox(format!("no such volume {}", spec.volume)));
        }
        state.next_id += 1;
        let id = format!("sandbox-{}", state.next_id);
        state.sandboxes.insert(
            id.clone(),
            FakeSandbox {
                spec: spec.clone(),
                files: Files::new(),
            },
        );
        state.created.push(spec.clone());
        state.events.push(format!("create {}", id));
        Ok(id)
    }

    fn run_sandbox(&self, id: &str) -> DvomResult<SandboxExit> {
        self.record(format!("run {}", id));
        if self.fail_run.get() {
            return Ok(SandboxExit {
                code: 2,
                logs: "tar: simulated failure".into(),
            });
        }

        let sandbox = self
            .state
            .borrow_mut()
            .sandboxes
            .remove(id)
            .ok_or_else(|| DvomError::Sandbox(format!("no such sandbox {}", id)))?;
        let result = self.execute(&sandbox);

        let mut sandbox = sandbox;
        let exit = match result {
            Ok(produced) => {
                sandbox.files.extend(produced.unwrap_or_default());
                SandboxExit {
                    code: 0,
                    logs: String::new(),
                }
            }
            Err(logs) => SandboxExit { code: 1, logs },
        };
        self.state
            .borrow_mut()
            .sandboxes
            .insert(id.to_string(), sandbox);
        Ok(exit)
    }

    fn copy_from_sandbox(&self, id: &str, path: &str, sink: &mut dyn Write) -> DvomResult<u64> {
        let contents = self
            .state
            .borrow()
            .sandboxes
            .get(id)
            .and_then(|s| s.files.get(path).cloned())
            .ok_or_else(|| DvomError::Sandbox(format!("{} not found in {}", path, id)))?;
        self.record(format!("copy-out {}", id));
        // small writes so size caps trip part way through
        for chunk in contents.chunks(4096) {
            sink.write_all(chunk)?;
        }
        Ok(contents.len() as u64)
    }

    fn copy_into_sandbox(
        &self,
        id: &str,
        dest_dir: &str,
        name: &str,
        source: &mut dyn Read,
        size: u64,
    ) -> DvomResult<()> {
        let mut contents = Vec::new();
        source.take(size).read_to_end(&mut contents)?;
        self.record(format!("copy-in {}", id));

        let path = format!("{}/{}", dest_dir.trim_end_matches('/'), name);
        self.state
            .borrow_mut()
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| DvomError::Sandbox(format!("no such sandbox {}", id)))?
            .files
            .insert(path, contents);
        Ok(())
    }

    fn remove_sandbox(&self, id: &str) -> DvomResult<()> {
        self.record(format!("remove {}", id));
        self.state.borrow_mut().sandboxes.remove(id);
        Ok(())
    }
}

fn fake_volume(name: &str) -> VolumeInfo {
    VolumeInfo {
        name: name.to_string(),
        driver: "local".into(),
        mountpoint: format!("/var/lib/docker/volumes/{}/_data", name),
        created_at: None,
    }
}

/// [`Prompter`] with scripted answers
#[derive(Default)]
pub struct CannedPrompter {
    passwords: RefCell<VecDeque<String>>,
    answer: bool,
    prompts: Cell<usize>,
    confirmations: Cell<usize>,
}

impl CannedPrompter {
    pub fn with_passwords(passwords: &[&str]) -> Self {
        Self {
            passwords: RefCell::new(passwords.iter().map(|p| p.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn answering(mut self, answer: bool) -> Self {
        self.answer = answer;
        self
    }

    /// Password prompts so far
    pub fn prompts(&self) -> usize {
        self.prompts.get()
    }

    pub fn confirmations(&self) -> usize {
        self.confirmations.get()
    }
}

impl Prompter for CannedPrompter {
    fn password(&self, _prompt: &str) -> DvomResult<SecureString> {
        self.prompts.set(self.prompts.get() + 1);
        self.passwords
            .borrow_mut()
            .pop_front()
            .map(SecureString::from)
            .ok_or_else(|| DvomError::Io("no password available".into()))
    }

    fn new_password(&self, prompt: &str) -> DvomResult<SecureString> {
        self.password(prompt)
    }

    fn confirm(&self, _message: &str) -> DvomResult<bool> {
        self.confirmations.set(self.confirmations.get() + 1);
        Ok(self.answer)
    }
}
