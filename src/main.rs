use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

use dvom::cli::{
    handle_backup_command, handle_config_command, handle_delete_command, handle_info_command,
    handle_list_command, handle_restore_command, handle_versions_command, handle_volumes_command,
    Context, StorageArgs,
};
use dvom::config::{paths::DvomPaths, settings::Settings};

#[derive(Parser)]
#[command(
    name = "dvom",
    version,
    about = "Versioned, optionally encrypted backups of Docker volumes",
    long_about = "dvom snapshots Docker volumes into local, S3 or GCS storage. \
                  Every backup becomes a new timestamped version of a named \
                  snapshot, optionally encrypted with AES-256-GCM, and any \
                  version can be restored into a volume."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Abort the command after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(flatten)]
    storage: StorageArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a volume as a new snapshot version
    Backup(dvom::cli::BackupArgs),

    /// Restore a snapshot version into a volume
    Restore(dvom::cli::RestoreArgs),

    /// List snapshots
    #[command(alias = "snapshots")]
    List(dvom::cli::ListArgs),

    /// Show detailed information about a snapshot
    Info(dvom::cli::InfoArgs),

    /// List all versions of a snapshot
    Versions(dvom::cli::VersionsArgs),

    /// Delete a snapshot, or one version of it
    Delete(dvom::cli::DeleteArgs),

    /// List Docker volumes
    Volumes(dvom::cli::VolumesArgs),

    /// Show or initialise the configuration
    Config {
        #[command(subcommand)]
        action: Option<dvom::cli::ConfigCommands>,
    },
}

fn run(cli: Cli) -> Result<()> {
    let paths = DvomPaths::new()?;
    let settings = Settings::load_or_create(&paths)
        .with_context(|| format!("loading {}", paths.settings_file().display()))?;
    let ctx = Context::new(
        paths,
        settings,
        cli.storage,
        cli.timeout.map(Duration::from_secs),
    );

    match cli.command {
        Commands::Backup(args) => handle_backup_command(&ctx, args)?,
        Commands::Restore(args) => handle_restore_command(&ctx, args)?,
        Commands::List(args) => handle_list_command(&ctx, args)?,
        Commands::Info(args) => handle_info_command(&ctx, args)?,
        Commands::Versions(args) => handle_versions_command(&ctx, args)?,
        Commands::Delete(args) => handle_delete_command(&ctx, args)?,
        Commands::Volumes(args) => handle_volumes_command(args)?,
        Commands::Config { action } => handle_config_command(&ctx, action)?,
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = dvom::logging::init(cli.verbose, cli.quiet) {
        eprintln!("Warning: failed to initialise logging: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
