//! Display formatting for terminal output
//!
//! Every listing renders either as a table (`tabled`) for people or as
//! JSON/YAML for scripts. All functions return strings; printing is left to
//! the CLI handlers.

pub mod snapshot;
pub mod volume;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DvomResult;

pub use snapshot::{
    format_deletion_preview, format_snapshot_details, format_snapshot_list, format_version_list,
};
pub use volume::format_volume_list;

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// Format a byte count with binary units, e.g. `2.0 KB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }
    format!("{:.1} {}", size, UNITS[unit_index])
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render a value as JSON or YAML; `None` for table output
pub(crate) fn render_structured<T: Serialize + ?Sized>(
    value: &T,
    format: OutputFormat,
) -> DvomResult<Option<String>> {
    match format {
        OutputFormat::Table => Ok(None),
        OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)?)),
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(value)?;
            Ok(Some(yaml.trim_end().to_string()))
        }
    }
}

/// Truncate text for a table cell, marking the cut with `...`
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}
