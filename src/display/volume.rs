//! Volume display formatting

use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{render_structured, OutputFormat};
use crate::containers::VolumeInfo;
use crate::error::DvomResult;

#[derive(Tabled)]
struct VolumeRow {
    #[tabled(rename = "Volume")]
    name: String,
    #[tabled(rename = "Driver")]
    driver: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Mountpoint")]
    mountpoint: String,
}

/// Format the engine's volumes, sorted by name
pub fn format_volume_list(volumes: &[VolumeInfo], format: OutputFormat) -> DvomResult<String> {
    let mut sorted: Vec<&VolumeInfo> = volumes.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    if let Some(output) = render_structured(&sorted, format)? {
        return Ok(output);
    }
    if sorted.is_empty() {
        return Ok("No Docker volumes found.".to_string());
    }

    let rows = sorted.iter().map(|v| VolumeRow {
        name: v.name.clone(),
        driver: v.driver.clone(),
        // docker prints e.g. "2024-03-01T12:00:00Z"; keep the date and time only
        created: v
            .created_at
            .as_deref()
            .map(|c| c.chars().take(19).collect::<String>().replace('T', " "))
            .unwrap_or_default(),
        mountpoint: v.mountpoint.clone(),
    });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    Ok(table.to_string())
}
