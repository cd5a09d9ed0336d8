//! Stopping containers around a volume operation
//!
//! [`ContainerSafety::stop_containers`] records which of the requested
//! containers were running, stops those, and hands back a [`StopGuard`].
//! The guard restarts exactly the containers it stopped, either explicitly
//! through [`StopGuard::restart`] or when it is dropped on an early return.
//! Containers that were already stopped are left alone.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tracing::{info, warn};

use super::engine::{short_id, ContainerEngine, ContainerSummary};
use crate::error::{DvomError, DvomResult};

/// Default grace period given to `docker stop`
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// A requested container and whether it was running when we got to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub was_running: bool,
}

/// Outcome of restarting previously stopped containers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartReport {
    pub restarted: Vec<String>,
    /// One message per container that failed to start again
    pub failures: Vec<String>,
}

impl RestartReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves container references and stops them
pub struct ContainerSafety<'a> {
    engine: &'a dyn ContainerEngine,
    grace: Duration,
}

impl<'a> ContainerSafety<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, grace: Duration) -> Self {
        Self { engine, grace }
    }

    /// Resolve references to containers, dropping duplicates
    ///
    /// A reference matches, in order of preference: a full id, a name (with
    /// or without the leading `/`), or a unique id prefix.
    pub fn resolve(&self, references: &[String]) -> DvomResult<Vec<ContainerSummary>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }

        let containers = self.engine.list_containers()?;
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for reference in references {
            let container = resolve_one(&containers, reference)?;
            if seen.insert(container.id.clone()) {
                resolved.push(container.clone());
            }
        }
        Ok(resolved)
    }

    /// Stop every running container in `references`
    ///
    /// If any stop fails, the containers stopped so far are restarted before
    /// the error is returned.
    pub fn stop_containers(&self, references: &[String]) -> DvomResult<StopGuard<'a>> {
        let mut guard = StopGuard::new(self.engine);

        for container in self.resolve(references)? {
            let name = container.display_name();
            let was_running = match self.engine.is_running(&container.id) {
                Ok(running) => running,
                Err(e) => return Err(abort(guard, e)),
            };

            if was_running {
                info!(container = %name, id = %short_id(&container.id), "Stopping container");
                if let Err(e) = self.engine.stop_container(&container.id, self.grace) {
                    let e = DvomError::Container(format!("failed to stop container {}: {}", name, e));
                    return Err(abort(guard, e));
                }
            } else {
                info!(container = %name, "Container already stopped");
            }

            guard.states.push(ContainerState {
                id: container.id,
                name,
                was_running,
            });
        }

        Ok(guard)
    }
}

fn resolve_one<'c>(
    containers: &'c [ContainerSummary],
    reference: &str,
) -> DvomResult<&'c ContainerSummary> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(DvomError::Validation("empty container reference".into()));
    }

    if let Some(container) = containers.iter().find(|c| c.id == reference) {
        return Ok(container);
    }

    let name = reference.trim_start_matches('/');
    if let Some(container) = containers
        .iter()
        .find(|c| c.names.iter().any(|n| n == name))
    {
        return Ok(container);
    }

    let mut by_prefix = containers.iter().filter(|c| c.id.starts_with(reference));
    match (by_prefix.next(), by_prefix.next()) {
        (Some(container), None) => Ok(container),
        (Some(_), Some(_)) => Err(DvomError::Validation(format!(
            "container reference {} is ambiguous",
            reference
        ))),
        (None, _) => Err(DvomError::container_not_found(reference)),
    }
}

/// Restart what was stopped and fold restart failures into `error`
fn abort(guard: StopGuard<'_>, error: DvomError) -> DvomError {
    let report = guard.restart();
    error.with_restart_failures(report.failures)
}

/// Containers stopped by [`ContainerSafety::stop_containers`]
pub struct StopGuard<'a> {
    engine: &'a dyn ContainerEngine,
    states: Vec<ContainerState>,
    finished: bool,
}

impl<'a> StopGuard<'a> {
    fn new(engine: &'a dyn ContainerEngine) -> Self {
        Self {
            engine,
            states: Vec::new(),
            finished: false,
        }
    }

    /// Every requested container with its prior running state
    pub fn states(&self) -> &[ContainerState] {
        &self.states
    }

    /// id to was-running map
    pub fn state_map(&self) -> BTreeMap<String, bool> {
        self.states
            .iter()
            .map(|s| (s.id.clone(), s.was_running))
            .collect()
    }

    /// Whether any container was actually stopped
    pub fn stopped_any(&self) -> bool {
        self.states.iter().any(|s| s.was_running)
    }

    /// Start every container that was running before
    ///
    /// Every container is attempted even if an earlier one fails.
    pub fn restart(mut self) -> RestartReport {
        self.restart_all()
    }

    fn restart_all(&mut self) -> RestartReport {
        self.finished = true;
        let mut report = RestartReport::default();
        for state in self.states.iter().filter(|s| s.was_running) {
            match self.engine.start_container(&state.id) {
                Ok(()) => {
                    info!(container = %state.name, "Restarted container");
                    report.restarted.push(state.name.clone());
                }
                Err(e) => {
                    let message =
                        format!("failed to restart container {}: {}", short_id(&state.id), e);
                    warn!("{}", message);
                    report.failures.push(message);
                }
            }
        }
        report
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        if !self.finished && self.stopped_any() {
            warn!("Restarting containers after an interrupted operation");
            self.restart_all();
        }
    }
}
