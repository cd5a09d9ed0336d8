//! Volume listing command

use clap::Args;

use crate::containers::{ContainerEngine, DockerCli};
use crate::display::{format_volume_list, OutputFormat};
use crate::error::DvomResult;

/// Arguments for `dvom volumes`
#[derive(Args, Debug, Clone)]
pub struct VolumesArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Handle `dvom volumes`; needs no storage backend
pub fn handle_volumes_command(args: VolumesArgs) -> DvomResult<()> {
    println!("{}", volume_listing(&DockerCli::new(), args.format)?);
    Ok(())
}

fn volume_listing(engine: &dyn ContainerEngine, format: OutputFormat) -> DvomResult<String> {
    let volumes = engine.list_volumes()?;
    format_volume_list(&volumes, format)
}
