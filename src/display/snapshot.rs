//! Snapshot display formatting
//!
//! Formats snapshots and their versions for the `list`, `info`, `versions`
//! and `delete` commands.

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{format_size, format_timestamp, render_structured, truncate, OutputFormat};
use crate::error::DvomResult;
use crate::storage::{BackupMetadata, SnapshotInfo, VersionInfo};

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Latest version")]
    version: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Versions")]
    versions: usize,
    #[tabled(rename = "Encrypted")]
    encrypted: &'static str,
    #[tabled(rename = "Volume")]
    volumes: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Encrypted")]
    encrypted: &'static str,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct PropertyRow {
    #[tabled(rename = "Property")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// `info` output: the resolved metadata plus every version of the snapshot
#[derive(Serialize)]
struct SnapshotDetails<'a> {
    #[serde(flatten)]
    metadata: &'a BackupMetadata,
    versions: &'a [VersionInfo],
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Format all snapshots, one row per snapshot name
pub fn format_snapshot_list(snapshots: &[SnapshotInfo], format: OutputFormat) -> DvomResult<String> {
    if let Some(output) = render_structured(snapshots, format)? {
        return Ok(output);
    }
    if snapshots.is_empty() {
        return Ok("No snapshots found.".to_string());
    }

    let rows = snapshots.iter().map(|s| SnapshotRow {
        name: s.name.clone(),
        version: s.version.clone(),
        size: format_size(s.size),
        versions: s.version_count,
        encrypted: yes_no(s.encrypted),
        volumes: s.volumes.join(", "),
        description: truncate(&s.description, 40),
    });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    Ok(format!("{}\n({} snapshots)", table, snapshots.len()))
}

/// Format the versions of one snapshot, oldest first
pub fn format_version_list(
    name: &str,
    versions: &[VersionInfo],
    format: OutputFormat,
) -> DvomResult<String> {
    if let Some(output) = render_structured(versions, format)? {
        return Ok(output);
    }
    if versions.is_empty() {
        return Ok(format!("No versions found for snapshot '{}'.", name));
    }

    Ok(format!("Versions of '{}':\n{}", name, version_table(versions)))
}

fn version_table(versions: &[VersionInfo]) -> Table {
    let rows = versions.iter().map(|v| VersionRow {
        version: v.version.clone(),
        created: format_timestamp(&v.created_at),
        size: format_size(v.size),
        encrypted: yes_no(v.encrypted),
        description: truncate(&v.description, 40),
    });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table
}

/// Format one snapshot version in detail, followed by its sibling versions
pub fn format_snapshot_details(
    metadata: &BackupMetadata,
    versions: &[VersionInfo],
    format: OutputFormat,
) -> DvomResult<String> {
    let details = SnapshotDetails { metadata, versions };
    if let Some(output) = render_structured(&details, format)? {
        return Ok(output);
    }

    let mut rows = vec![
        PropertyRow {
            key: "Snapshot",
            value: metadata.name.clone(),
        },
        PropertyRow {
            key: "Version",
            value: metadata.version.clone(),
        },
        PropertyRow {
            key: "Created",
            value: format_timestamp(&metadata.created_at),
        },
        PropertyRow {
            key: "Size",
            value: format_size(metadata.size),
        },
        PropertyRow {
            key: "Type",
            value: metadata.backup_type.clone(),
        },
        PropertyRow {
            key: "Encrypted",
            value: yes_no(metadata.encrypted).to_string(),
        },
    ];
    let volumes = metadata.volumes();
    if !volumes.is_empty() {
        rows.push(PropertyRow {
            key: "Volumes",
            value: volumes.join(", "),
        });
    }
    if !metadata.description.is_empty() {
        rows.push(PropertyRow {
            key: "Description",
            value: metadata.description.clone(),
        });
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());

    let mut output = table.to_string();
    if versions.len() > 1 {
        output.push_str(&format!(
            "\n\nAll versions ({}):\n{}",
            versions.len(),
            version_table(versions)
        ));
    }
    Ok(output)
}

/// The warning shown before a delete asks for confirmation
pub fn format_deletion_preview(name: &str, version: Option<&str>, versions: &[VersionInfo]) -> String {
    match version {
        Some(version) => format!(
            "This will permanently delete version {} of snapshot '{}'.",
            version, name
        ),
        None => {
            let mut output = format!(
                "This will permanently delete ALL {} version(s) of snapshot '{}':",
                versions.len(),
                name
            );
            for v in versions {
                output.push_str(&format!(
                    "\n  {}  {}  {}",
                    v.version,
                    format_timestamp(&v.created_at),
                    format_size(v.size)
                ));
            }
            output
        }
    }
}
