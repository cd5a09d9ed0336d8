//! Backup CLI command
//!
//! Snapshots one Docker volume into the configured storage backend.

use clap::Args;

use super::{container_list, Context};
use crate::backup::{BackupManager, BackupRequest, TerminalPrompter};
use crate::containers::DockerCli;
use crate::crypto::SecureString;
use crate::error::DvomResult;

/// Arguments for `dvom backup`
#[derive(Args, Debug, Clone)]
pub struct BackupArgs {
    /// Volume name to back up
    #[arg(long)]
    pub volume: String,

    /// Name for the snapshot [default: the volume name]
    #[arg(short, long)]
    pub name: Option<String>,

    /// Free-text description stored with the snapshot
    #[arg(short, long)]
    pub description: Option<String>,

    /// Encrypt the backup with AES-256-GCM
    #[arg(long)]
    pub encrypt: bool,

    /// Password for encryption; supplying one turns encryption on
    #[arg(long, env = "DVOM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Containers to stop during the backup (comma-separated)
    #[arg(long, value_name = "NAMES")]
    pub stop_containers: Vec<String>,
}

impl BackupArgs {
    fn request(&self) -> BackupRequest {
        BackupRequest {
            volume: self.volume.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            encrypt: self.encrypt || self.password.is_some(),
            password: self.password.as_deref().map(SecureString::from),
            stop_containers: container_list(&self.stop_containers),
        }
    }
}

/// Handle `dvom backup`
pub fn handle_backup_command(ctx: &Context, args: BackupArgs) -> DvomResult<()> {
    let snapshots = ctx.snapshots()?;
    let engine = DockerCli::new();
    let manager = BackupManager::new(&engine, &snapshots, &TerminalPrompter, ctx.pipeline_config());

    let report = manager.backup(&args.request())?;
    println!("{}", report.summary());
    Ok(())
}
