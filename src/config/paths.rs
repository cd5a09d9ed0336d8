//! Path management for dvom
//!
//! ## Path Resolution Order
//!
//! 1. `DVOM_CONFIG_DIR` environment variable (if set)
//! 2. The platform config directory (`~/.config/dvom` on Linux,
//!    `~/Library/Application Support/dvom` on macOS, `%APPDATA%\dvom` on Windows)

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::DvomError;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "DVOM_CONFIG_DIR";

/// Manages all paths used by dvom
#[derive(Debug, Clone)]
pub struct DvomPaths {
    base_dir: PathBuf,
}

impl DvomPaths {
    /// Resolve the config directory from the environment or the platform default
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, DvomError> {
        let base_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => ProjectDirs::from("", "", "dvom")
                .map(|dirs| dirs.config_dir().to_path_buf())
                .ok_or_else(|| {
                    DvomError::Config("Could not determine the home directory".into())
                })?,
        };

        Ok(Self { base_dir })
    }

    /// Create DvomPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Default location of the filesystem backend
    pub fn default_backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Ensure the config directory exists
    pub fn ensure_directories(&self) -> Result<(), DvomError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| DvomError::Io(format!("Failed to create config directory: {}", e)))
    }

    /// Check if a settings file has been written
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}
