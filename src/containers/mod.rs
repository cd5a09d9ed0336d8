//! Container runtime access
//!
//! - `engine`: the [`ContainerEngine`] contract
//! - `docker`: implementation over the `docker` CLI
//! - `safety`: stop/restart bookkeeping around volume operations

pub mod docker;
pub mod engine;
pub mod safety;

pub use docker::DockerCli;
pub use engine::{ContainerEngine, ContainerSummary, SandboxExit, SandboxSpec, VolumeInfo};
pub use safety::{ContainerSafety, ContainerState, RestartReport, StopGuard, DEFAULT_STOP_GRACE};
