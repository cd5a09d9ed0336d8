//! dvom - Docker volume snapshot manager
//!
//! This library snapshots Docker volumes into pluggable object storage,
//! keeps every backup as a timestamped version of a named snapshot, and can
//! encrypt snapshots with a password-derived key.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `crypto`: Streaming AES-256-GCM codec and key derivation
//! - `storage`: The object store contract, its backends and the versioning layer
//! - `containers`: The container engine seam and the container safety manager
//! - `backup`: Backup and restore pipelines
//! - `display`: Table, JSON and YAML output
//! - `cli`: Command handlers for the `dvom` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use dvom::storage::{LocalStorage, SnapshotStorage};
//!
//! let snapshots = SnapshotStorage::new(LocalStorage::new("/var/backups/dvom")?);
//! for snapshot in snapshots.list_snapshots()? {
//!     println!("{} ({} versions)", snapshot.name, snapshot.version_count);
//! }
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod containers;
pub mod crypto;
pub mod display;
pub mod error;
pub mod logging;
pub mod storage;

#[cfg(test)]
mod testing;

pub use error::{DvomError, DvomResult};
