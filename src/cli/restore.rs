//! Restore CLI command

use clap::Args;

use super::{container_list, Context};
use crate::backup::{RestoreManager, RestoreOutcome, RestoreRequest, TerminalPrompter};
use crate::containers::DockerCli;
use crate::crypto::SecureString;
use crate::error::DvomResult;

/// Arguments for `dvom restore`
#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Snapshot to restore (`name` or `name@version`)
    #[arg(short, long)]
    pub snapshot: String,

    /// Specific version to restore (format: YYYYMMDD-HHMMSS)
    #[arg(long = "version", value_name = "VERSION")]
    pub snapshot_version: Option<String>,

    /// Volume to restore into; its current contents are replaced
    #[arg(long)]
    pub target_volume: String,

    /// Show what would be restored without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,

    /// Password for decryption (prompted if the snapshot is encrypted)
    #[arg(long, env = "DVOM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Containers to stop during the restore (comma-separated)
    #[arg(long, value_name = "NAMES")]
    pub stop_containers: Vec<String>,
}

impl RestoreArgs {
    fn request(&self) -> RestoreRequest {
        RestoreRequest {
            snapshot: self.snapshot.clone(),
            version: self.snapshot_version.clone(),
            target_volume: self.target_volume.clone(),
            dry_run: self.dry_run,
            force: self.force,
            password: self.password.as_deref().map(SecureString::from),
            stop_containers: container_list(&self.stop_containers),
        }
    }
}

/// Handle `dvom restore`
pub fn handle_restore_command(ctx: &Context, args: RestoreArgs) -> DvomResult<()> {
    let snapshots = ctx.snapshots()?;
    let engine = DockerCli::new();
    let manager =
        RestoreManager::new(&engine, &snapshots, &TerminalPrompter, ctx.pipeline_config());

    match manager.restore(&args.request())? {
        RestoreOutcome::Restored(report) => println!("{}", report.summary()),
        RestoreOutcome::DryRun(plan) => {
            println!("Dry run: nothing was changed.");
            println!();
            println!("{}", plan.describe());
        }
        RestoreOutcome::Declined(_) => println!("Restore cancelled."),
    }
    Ok(())
}
