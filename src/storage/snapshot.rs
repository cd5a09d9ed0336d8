//! Snapshot versioning layer
//!
//! Snapshots are stored under `name@version` keys, where the version token is
//! the UTC store time formatted `YYYYMMDD-HHMMSS`. A bare name resolves to the
//! version with the greatest `created_at`.
//!
//! Tokens have one-second resolution. Two stores of the same name within one
//! second produce the same key and the later write replaces the earlier one;
//! a warning is logged when that happens.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::{Backup, BackupMetadata, ObjectStore};
use crate::error::{DvomError, DvomResult};

/// Separates the snapshot name from its version token
pub const VERSION_SEPARATOR: char = '@';

/// strftime format of version tokens
pub const VERSION_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Metadata type of snapshots written by this layer
pub const SNAPSHOT_TYPE: &str = "volume-snapshot";

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Aggregate view over all versions sharing a name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    /// Size of the latest version
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Token of the latest version
    pub version: String,
    pub version_count: usize,
    pub encrypted: bool,
}

/// One version of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub encrypted: bool,
}

impl VersionInfo {
    fn from_metadata(version: &str, metadata: &BackupMetadata) -> Self {
        Self {
            version: version.to_string(),
            size: metadata.size,
            created_at: metadata.created_at,
            description: metadata.description.clone(),
            encrypted: metadata.encrypted,
        }
    }
}

/// Normalise a user-supplied snapshot name for use as a key prefix
pub fn clean_snapshot_name(name: &str) -> String {
    let mut name = name.trim();
    for ext in [".tar.gz", ".tgz", ".zip"] {
        if let Some(stripped) = name.strip_suffix(ext) {
            name = stripped;
            break;
        }
    }
    name.replace(['/', '\\'], "-")
}

/// Split `name@version` into its parts
///
/// Only the first separator counts; everything after it is the version.
pub fn split_versioned(input: &str) -> DvomResult<(String, Option<String>)> {
    let cleaned = clean_snapshot_name(input);
    let (name, version) = match cleaned.split_once(VERSION_SEPARATOR) {
        Some((name, version)) => {
            if version.is_empty() {
                return Err(DvomError::Validation(format!(
                    "missing version after '{}' in {}",
                    VERSION_SEPARATOR, input
                )));
            }
            (name.to_string(), Some(version.to_string()))
        }
        None => (cleaned, None),
    };
    if name.is_empty() {
        return Err(DvomError::Validation("snapshot name is required".into()));
    }
    Ok((name, version))
}

/// Build the object key for a snapshot version
pub fn versioned_key(name: &str, version: &str) -> String {
    format!("{}{}{}", name, VERSION_SEPARATOR, version)
}

/// Fold a separately given version into a snapshot reference
///
/// `("db", Some("v1"))` becomes `db@v1`; a reference that already names a
/// different version is a validation error.
pub fn with_version(reference: &str, version: Option<&str>) -> DvomResult<String> {
    let Some(version) = version else {
        return Ok(reference.to_string());
    };
    match split_versioned(reference)? {
        (name, None) => Ok(versioned_key(&name, version)),
        (name, Some(existing)) if existing == version => Ok(versioned_key(&name, version)),
        (_, Some(existing)) => Err(DvomError::Validation(format!(
            "conflicting versions {} and {}",
            existing, version
        ))),
    }
}

fn ordering_key(metadata: &BackupMetadata, version: &str) -> (DateTime<Utc>, String) {
    (metadata.created_at, version.to_string())
}

/// Name-based, timestamp-versioned snapshots over an [`ObjectStore`]
pub struct SnapshotStorage<S> {
    backend: S,
    clock: Clock,
}

impl<S: ObjectStore> SnapshotStorage<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the wall clock used for version tokens
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Store a new version of `name`; returns the version token
    pub fn store_snapshot(&self, name: &str, mut backup: Backup) -> DvomResult<String> {
        let name = clean_snapshot_name(name);
        if name.is_empty() {
            return Err(DvomError::Validation("snapshot name is required".into()));
        }
        if name.contains(VERSION_SEPARATOR) {
            return Err(DvomError::Validation(format!(
                "snapshot name cannot contain '{}': {}",
                VERSION_SEPARATOR, name
            )));
        }

        let now = (self.clock)();
        let version = now.format(VERSION_FORMAT).to_string();
        let key = versioned_key(&name, &version);

        if self.backend.exists(&key)? {
            warn!(snapshot = %name, version = %version, "Version already exists and will be replaced");
        }

        backup.id = key.clone();
        backup.metadata.id = key.clone();
        backup.metadata.name = name.clone();
        backup.metadata.backup_type = SNAPSHOT_TYPE.to_string();
        backup.metadata.created_at = now;
        backup.metadata.version = version.clone();

        self.backend.store(backup)?;
        debug!(snapshot = %name, version = %version, "Stored snapshot version");
        Ok(version)
    }

    /// Resolve `name` or `name@version` to an exact object key
    pub fn resolve(&self, name_or_versioned: &str) -> DvomResult<String> {
        match split_versioned(name_or_versioned)? {
            (name, Some(version)) => Ok(versioned_key(&name, &version)),
            (name, None) => {
                let version = self.get_latest_version(&name)?;
                Ok(versioned_key(&name, &version))
            }
        }
    }

    /// Fetch a version, or the latest version for a bare name
    pub fn get_snapshot(&self, name_or_versioned: &str) -> DvomResult<Backup> {
        let key = self.resolve(name_or_versioned)?;
        self.backend.retrieve(&key).map_err(|e| {
            if e.is_not_found() {
                DvomError::version_not_found(key)
            } else {
                e
            }
        })
    }

    /// Metadata of a version without opening its data
    pub fn get_metadata(&self, name_or_versioned: &str) -> DvomResult<BackupMetadata> {
        let key = self.resolve(name_or_versioned)?;
        self.backend
            .list()?
            .into_iter()
            .find(|metadata| metadata.id == key)
            .ok_or_else(|| DvomError::version_not_found(key))
    }

    /// One entry per snapshot name, sorted by name
    pub fn list_snapshots(&self) -> DvomResult<Vec<SnapshotInfo>> {
        let mut groups: BTreeMap<String, Vec<(String, BackupMetadata)>> = BTreeMap::new();
        for metadata in self.backend.list()? {
            // Backups without a version separator are not snapshots
            let Some((name, version)) = metadata.id.split_once(VERSION_SEPARATOR) else {
                continue;
            };
            let (name, version) = (name.to_string(), version.to_string());
            groups.entry(name).or_default().push((version, metadata));
        }

        let snapshots = groups
            .into_iter()
            .filter_map(|(name, versions)| {
                let count = versions.len();
                let (version, latest) = versions
                    .into_iter()
                    .max_by_key(|(version, metadata)| ordering_key(metadata, version))?;
                Some(SnapshotInfo {
                    name,
                    size: latest.size,
                    created_at: latest.created_at,
                    description: latest.description.clone(),
                    volumes: latest.volumes().into_iter().map(String::from).collect(),
                    version,
                    version_count: count,
                    encrypted: latest.encrypted,
                })
            })
            .collect();
        Ok(snapshots)
    }

    /// Delete one version, or every version of a bare name
    ///
    /// Returns the deleted version tokens.
    pub fn delete_snapshot(&self, name_or_versioned: &str) -> DvomResult<Vec<String>> {
        match split_versioned(name_or_versioned)? {
            (name, Some(version)) => {
                let key = versioned_key(&name, &version);
                if !self.backend.exists(&key)? {
                    return Err(DvomError::version_not_found(key));
                }
                self.backend.delete(&key)?;
                Ok(vec![version])
            }
            (name, None) => {
                let versions = self.list_versions(&name)?;
                if versions.is_empty() {
                    return Err(DvomError::snapshot_not_found(name));
                }
                let mut deleted = Vec::with_capacity(versions.len());
                for info in versions {
                    self.backend
                        .delete(&versioned_key(&name, &info.version))
                        .map_err(|e| {
                            DvomError::Storage(format!(
                                "Failed to delete version {} of {}: {}",
                                info.version, name, e
                            ))
                        })?;
                    deleted.push(info.version);
                }
                Ok(deleted)
            }
        }
    }

    /// Whether a version, or any version of a bare name, exists
    pub fn snapshot_exists(&self, name_or_versioned: &str) -> DvomResult<bool> {
        match split_versioned(name_or_versioned)? {
            (name, Some(version)) => self.backend.exists(&versioned_key(&name, &version)),
            (name, None) => Ok(!self.list_versions(&name)?.is_empty()),
        }
    }

    /// All versions of `name`, oldest first
    pub fn list_versions(&self, name: &str) -> DvomResult<Vec<VersionInfo>> {
        let name = clean_snapshot_name(name);
        let prefix = format!("{}{}", name, VERSION_SEPARATOR);

        let mut versions: Vec<VersionInfo> = self
            .backend
            .list()?
            .iter()
            .filter_map(|metadata| {
                let version = metadata.id.strip_prefix(&prefix)?;
                Some(VersionInfo::from_metadata(version, metadata))
            })
            .collect();
        versions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version.cmp(&b.version))
        });
        Ok(versions)
    }

    /// Token of the version with the greatest `created_at`
    pub fn get_latest_version(&self, name: &str) -> DvomResult<String> {
        self.list_versions(name)?
            .pop()
            .map(|info| info.version)
            .ok_or_else(|| DvomError::snapshot_not_found(clean_snapshot_name(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use chrono::{Duration, TimeZone};
    use std::cell::Cell;
    use std::io::Read;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// Clock that advances by `step` seconds per call
    fn stepping_clock(step: i64) -> impl Fn() -> DateTime<Utc> {
        let calls = Rc::new(Cell::new(0i64));
        move || {
            let n = calls.get();
            calls.set(n + 1);
            base_time() + Duration::seconds(n * step)
        }
    }

    fn snapshot_storage(dir: &TempDir) -> SnapshotStorage<LocalStorage> {
        SnapshotStorage::new(LocalStorage::new(dir.path()).unwrap()).with_clock(stepping_clock(5))
    }

    fn backup(data: &'static [u8]) -> Backup {
        let mut metadata = BackupMetadata::new("ignored", "ignored");
        metadata.volume_name = "v1".into();
        Backup::new("ignored", metadata, Box::new(data))
    }

    fn read_all(mut backup: Backup) -> Vec<u8> {
        let mut out = Vec::new();
        backup.data.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_clean_snapshot_name() {
        assert_eq!(clean_snapshot_name("db.tar.gz"), "db");
        assert_eq!(clean_snapshot_name("db.tgz"), "db");
        assert_eq!(clean_snapshot_name("db.zip"), "db");
        assert_eq!(clean_snapshot_name("team/app\\db"), "team-app-db");
        assert_eq!(clean_snapshot_name("  spaced  "), "spaced");
    }

    #[test]
    fn test_split_versioned() {
        assert_eq!(split_versioned("db").unwrap(), ("db".to_string(), None));
        assert_eq!(
            split_versioned("db@20240101-000000").unwrap(),
            ("db".to_string(), Some("20240101-000000".to_string()))
        );
        // only the first separator splits
        assert_eq!(
            split_versioned("db@a@b").unwrap(),
            ("db".to_string(), Some("a@b".to_string()))
        );
        assert!(split_versioned("db@").unwrap_err().is_validation());
        assert!(split_versioned("@v").unwrap_err().is_validation());
    }

    #[test]
    fn test_with_version() {
        assert_eq!(with_version("db", None).unwrap(), "db");
        assert_eq!(with_version("db", Some("v1")).unwrap(), "db@v1");
        assert_eq!(with_version("db@v1", Some("v1")).unwrap(), "db@v1");
        assert!(with_version("db@v1", Some("v2")).unwrap_err().is_validation());
    }

    #[test]
    fn test_store_assigns_version() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);

        let version = storage.store_snapshot("b1.tar.gz", backup(b"one")).unwrap();
        assert_eq!(version, "20240301-120000");

        let stored = storage.get_snapshot("b1").unwrap();
        assert_eq!(stored.id, "b1@20240301-120000");
        assert_eq!(stored.metadata.name, "b1");
        assert_eq!(stored.metadata.version, version);
        assert_eq!(stored.metadata.backup_type, SNAPSHOT_TYPE);
        assert_eq!(stored.metadata.created_at, base_time());
    }

    #[test]
    fn test_store_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        assert!(storage.store_snapshot("", backup(b"x")).unwrap_err().is_validation());
        assert!(storage
            .store_snapshot("a@b", backup(b"x"))
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_two_stores_two_versions() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);

        let first = storage.store_snapshot("b1", backup(b"first")).unwrap();
        let second = storage.store_snapshot("b1", backup(b"second")).unwrap();
        assert_ne!(first, second);

        let versions = storage.list_versions("b1").unwrap();
        let tokens: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(tokens, vec![first.as_str(), second.as_str()]);

        assert_eq!(read_all(storage.get_snapshot("b1").unwrap()), b"second");
        assert_eq!(
            read_all(storage.get_snapshot(&format!("b1@{}", first)).unwrap()),
            b"first"
        );
    }

    #[test]
    fn test_latest_follows_created_at_not_token() {
        let dir = TempDir::new().unwrap();
        let times = Rc::new(Cell::new(0));
        let clock_times = times.clone();
        // second store happens "earlier" after a clock adjustment
        let storage = SnapshotStorage::new(LocalStorage::new(dir.path()).unwrap()).with_clock(
            move || {
                let n = clock_times.get();
                clock_times.set(n + 1);
                if n == 0 {
                    base_time()
                } else {
                    base_time() - Duration::hours(1)
                }
            },
        );

        let newer = storage.store_snapshot("b1", backup(b"newer")).unwrap();
        let _older = storage.store_snapshot("b1", backup(b"older")).unwrap();
        assert_eq!(times.get(), 2);

        assert_eq!(storage.get_latest_version("b1").unwrap(), newer);
        assert_eq!(read_all(storage.get_snapshot("b1").unwrap()), b"newer");
    }

    #[test]
    fn test_list_snapshots_groups_by_name() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        storage.store_snapshot("web", backup(b"w")).unwrap();
        storage.store_snapshot("db", backup(b"d1")).unwrap();
        let latest = storage.store_snapshot("db", backup(b"d2-longer")).unwrap();

        let snapshots = storage.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name, "db");
        assert_eq!(snapshots[0].version_count, 2);
        assert_eq!(snapshots[0].version, latest);
        assert_eq!(snapshots[0].size, 9);
        assert_eq!(snapshots[0].volumes, vec!["v1".to_string()]);
        assert_eq!(snapshots[1].name, "web");
        assert_eq!(snapshots[1].version_count, 1);
        assert!(!snapshots[1].encrypted);
    }

    #[test]
    fn test_list_ignores_unversioned_backups() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        storage.backend().store(backup(b"raw")).unwrap();
        storage.store_snapshot("db", backup(b"d")).unwrap();

        let names: Vec<String> = storage
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["db"]);
    }

    #[test]
    fn test_prefix_does_not_match_longer_names() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        storage.store_snapshot("db", backup(b"a")).unwrap();
        storage.store_snapshot("db2", backup(b"b")).unwrap();

        assert_eq!(storage.list_versions("db").unwrap().len(), 1);
    }

    #[test]
    fn test_delete_all_versions() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        storage.store_snapshot("b1", backup(b"1")).unwrap();
        storage.store_snapshot("b1", backup(b"2")).unwrap();

        let deleted = storage.delete_snapshot("b1").unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(storage.list_versions("b1").unwrap().is_empty());
        assert!(!storage.snapshot_exists("b1").unwrap());

        assert!(storage.delete_snapshot("b1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_one_version_keeps_newer() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        let older = storage.store_snapshot("b1", backup(b"old")).unwrap();
        let newer = storage.store_snapshot("b1", backup(b"new")).unwrap();

        let deleted = storage.delete_snapshot(&format!("b1@{}", older)).unwrap();
        assert_eq!(deleted, vec![older.clone()]);

        assert_eq!(storage.get_latest_version("b1").unwrap(), newer);
        assert_eq!(read_all(storage.get_snapshot("b1").unwrap()), b"new");
        assert!(!storage.snapshot_exists(&format!("b1@{}", older)).unwrap());
    }

    #[test]
    fn test_missing_lookups_are_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        storage.store_snapshot("b1", backup(b"1")).unwrap();

        assert!(storage.get_snapshot("nope").unwrap_err().is_not_found());
        assert!(storage
            .get_snapshot("b1@19990101-000000")
            .unwrap_err()
            .is_not_found());
        assert!(storage
            .delete_snapshot("b1@19990101-000000")
            .unwrap_err()
            .is_not_found());
        assert!(storage.get_latest_version("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_same_second_store_replaces_version() {
        let dir = TempDir::new().unwrap();
        let storage = SnapshotStorage::new(LocalStorage::new(dir.path()).unwrap())
            .with_clock(base_time);

        let a = storage.store_snapshot("b1", backup(b"first")).unwrap();
        let b = storage.store_snapshot("b1", backup(b"second")).unwrap();
        assert_eq!(a, b);
        assert_eq!(storage.list_versions("b1").unwrap().len(), 1);
        assert_eq!(read_all(storage.get_snapshot("b1").unwrap()), b"second");
    }

    #[test]
    fn test_get_metadata_resolves_latest() {
        let dir = TempDir::new().unwrap();
        let storage = snapshot_storage(&dir);
        storage.store_snapshot("db", backup(b"old")).unwrap();
        let latest = storage.store_snapshot("db", backup(b"newest")).unwrap();

        let metadata = storage.get_metadata("db").unwrap();
        assert_eq!(metadata.version, latest);
        assert_eq!(metadata.size, 6);
        assert!(storage
            .get_metadata("db@19990101-000000")
            .unwrap_err()
            .is_not_found());
    }
}
