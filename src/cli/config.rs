//! Configuration CLI commands

use clap::Subcommand;

use super::Context;
use crate::error::DvomResult;

/// `dvom config` subcommands; without one, the configuration is shown
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Write the default settings file
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
}

/// Handle `dvom config`
pub fn handle_config_command(ctx: &Context, cmd: Option<ConfigCommands>) -> DvomResult<()> {
    match cmd {
        None => println!("{}", describe(ctx)?),
        Some(ConfigCommands::Init { force }) => println!("{}", init(ctx, force)?),
    }
    Ok(())
}

fn describe(ctx: &Context) -> DvomResult<String> {
    let storage = ctx.storage_config()?;
    let settings_file = ctx.paths.settings_file();

    let mut lines = vec![
        "dvom Configuration".to_string(),
        "==================".to_string(),
        format!("Config directory: {}", ctx.paths.base_dir().display()),
        format!(
            "Settings file:    {}{}",
            settings_file.display(),
            if ctx.paths.is_initialized() { "" } else { " (not created)" }
        ),
        format!("Storage backend:  {}", storage.kind()),
    ];
    if let crate::storage::StorageConfig::Local(local) = &storage {
        lines.push(format!("Backup directory: {}", local.base_path.display()));
    }
    lines.push(String::new());
    lines.push("Settings:".to_string());
    lines.push(serde_json::to_string_pretty(&ctx.settings)?);
    Ok(lines.join("\n"))
}

fn init(ctx: &Context, force: bool) -> DvomResult<String> {
    let settings_file = ctx.paths.settings_file();
    if ctx.paths.is_initialized() && !force {
        return Ok(format!(
            "Settings file already exists: {}\nUse --force to overwrite it.",
            settings_file.display()
        ));
    }
    ctx.settings.save(&ctx.paths)?;
    Ok(format!("Wrote settings to {}", settings_file.display()))
}
