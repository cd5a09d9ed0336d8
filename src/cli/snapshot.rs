//! Snapshot CLI commands
//!
//! Implements `list`, `info`, `versions` and `delete` against the
//! configured storage backend.

use clap::Args;
use tracing::info;

use super::Context;
use crate::backup::{Prompter, TerminalPrompter};
use crate::display::{
    format_deletion_preview, format_snapshot_details, format_snapshot_list, format_version_list,
    OutputFormat,
};
use crate::error::{DvomError, DvomResult};
use crate::storage::snapshot::{split_versioned, versioned_key, with_version};
use crate::storage::{ObjectStore, SnapshotStorage};

/// Arguments for `dvom list`
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Arguments for `dvom info`
#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Snapshot name, or `name@version` for a specific version
    pub snapshot: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Arguments for `dvom versions`
#[derive(Args, Debug, Clone)]
pub struct VersionsArgs {
    /// Snapshot name
    pub snapshot: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Arguments for `dvom delete`
#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Snapshot name, or `name@version` for a specific version
    pub snapshot: String,

    /// Specific version to delete (format: YYYYMMDD-HHMMSS)
    #[arg(long = "version", value_name = "VERSION")]
    pub snapshot_version: Option<String>,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,
}

/// Handle `dvom list`
pub fn handle_list_command(ctx: &Context, args: ListArgs) -> DvomResult<()> {
    let snapshots = ctx.snapshots()?.list_snapshots()?;
    println!("{}", format_snapshot_list(&snapshots, args.format)?);
    Ok(())
}

/// Handle `dvom info`
pub fn handle_info_command(ctx: &Context, args: InfoArgs) -> DvomResult<()> {
    println!("{}", snapshot_info(&ctx.snapshots()?, &args)?);
    Ok(())
}

/// Handle `dvom versions`
pub fn handle_versions_command(ctx: &Context, args: VersionsArgs) -> DvomResult<()> {
    let snapshots = ctx.snapshots()?;
    let (name, version) = split_versioned(&args.snapshot)?;
    if version.is_some() {
        return Err(DvomError::Validation(format!(
            "expected a snapshot name without a version: {}",
            args.snapshot
        )));
    }
    let versions = snapshots.list_versions(&name)?;
    println!("{}", format_version_list(&name, &versions, args.format)?);
    Ok(())
}

/// Handle `dvom delete`
pub fn handle_delete_command(ctx: &Context, args: DeleteArgs) -> DvomResult<()> {
    println!("{}", delete_snapshot(&ctx.snapshots()?, &TerminalPrompter, &args)?);
    Ok(())
}

fn snapshot_info<S: ObjectStore>(
    snapshots: &SnapshotStorage<S>,
    args: &InfoArgs,
) -> DvomResult<String> {
    let (name, _) = split_versioned(&args.snapshot)?;
    let metadata = snapshots.get_metadata(&args.snapshot)?;
    let versions = snapshots.list_versions(&name)?;
    format_snapshot_details(&metadata, &versions, args.format)
}

/// Confirm (unless forced) and delete; returns the message to print
fn delete_snapshot<S: ObjectStore>(
    snapshots: &SnapshotStorage<S>,
    prompter: &dyn Prompter,
    args: &DeleteArgs,
) -> DvomResult<String> {
    let reference = with_version(&args.snapshot, args.snapshot_version.as_deref())?;
    let (name, version) = split_versioned(&reference)?;

    let versions = snapshots.list_versions(&name)?;
    match &version {
        Some(version) if !versions.iter().any(|v| v.version == *version) => {
            return Err(DvomError::version_not_found(versioned_key(&name, version)));
        }
        None if versions.is_empty() => return Err(DvomError::snapshot_not_found(name)),
        _ => {}
    }

    if !args.force {
        let preview = format_deletion_preview(&name, version.as_deref(), &versions);
        if !prompter.confirm(&format!("{}\nContinue?", preview))? {
            return Ok("Delete cancelled.".to_string());
        }
    }

    let deleted = snapshots.delete_snapshot(&reference)?;
    info!(snapshot = %name, versions = deleted.len(), "Deleted snapshot");
    Ok(match version {
        Some(version) => format!("Deleted version {} of snapshot '{}'.", version, name),
        None => format!(
            "Deleted {} version(s) of snapshot '{}'.",
            deleted.len(),
            name
        ),
    })
}
