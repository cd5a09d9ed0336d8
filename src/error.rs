//! Custom error types for dvom
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions. The variants follow the failure classes an
//! operator has to tell apart: missing things, bad passwords, bad backups,
//! size caps, backend I/O and container lifecycle problems.

use std::io;

use thiserror::Error;

/// The main error type for dvom operations
#[derive(Error, Debug)]
pub enum DvomError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local file I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML output errors
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Invalid user input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors (volume, container, snapshot, version)
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Wrong password or tampered ciphertext
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Stored data is not what its metadata claims
    #[error("Corrupted backup: {0}")]
    Corrupted(String),

    /// A copy or extraction exceeded the hard size cap
    #[error("Size limit exceeded: more than {limit} bytes")]
    ResourceLimit { limit: u64 },

    /// Cipher setup or random number generation errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Container stop/start errors
    #[error("Container error: {0}")]
    Container(String),

    /// Sandbox creation, execution or copy errors
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// The operation was cancelled or ran past its deadline
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A pipeline failure together with the containers that could not be
    /// restarted afterwards
    #[error("{source} (additionally failed to restart containers: {})", restart_failures.join("; "))]
    Pipeline {
        source: Box<DvomError>,
        restart_failures: Vec<String>,
    },
}

impl DvomError {
    /// Create a "not found" error for volumes
    pub fn volume_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Volume",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for containers
    pub fn container_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Container",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for snapshots
    pub fn snapshot_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Snapshot",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for raw backend objects
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for snapshot versions
    pub fn version_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Snapshot version",
            identifier: identifier.into(),
        }
    }

    /// Attach container restart failures to a pipeline error
    pub fn with_restart_failures(self, failures: Vec<String>) -> Self {
        if failures.is_empty() {
            return self;
        }
        Self::Pipeline {
            source: Box::new(self),
            restart_failures: failures,
        }
    }

    /// The primary error, looking through restart-failure wrappers
    pub fn root(&self) -> &DvomError {
        match self {
            Self::Pipeline { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_))
    }

    /// Check if this is an authentication (wrong password / tampering) error
    pub fn is_authentication(&self) -> bool {
        matches!(self.root(), Self::Authentication(_))
    }

    /// Check if this is a corrupted-backup error
    pub fn is_corrupted(&self) -> bool {
        matches!(self.root(), Self::Corrupted(_))
    }

    /// Check if this is a size-cap error
    pub fn is_resource_limit(&self) -> bool {
        matches!(self.root(), Self::ResourceLimit { .. })
    }

    /// Check if this is a cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }

    /// Wrap this error so it can cross a `Read`/`Write` boundary
    ///
    /// The kind is deliberately not `Interrupted`: `io::copy` retries those.
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self)
    }
}

// Implement From traits for common error types

impl From<io::Error> for DvomError {
    fn from(err: io::Error) -> Self {
        // Errors raised inside our own readers come back out unchanged
        if err.get_ref().is_some_and(|inner| inner.is::<DvomError>()) {
            if let Some(Ok(inner)) = err.into_inner().map(|inner| inner.downcast::<DvomError>()) {
                return *inner;
            }
            return Self::Io("wrapped error lost in transit".to_string());
        }
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DvomError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for DvomError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

/// Result type alias for dvom operations
pub type DvomResult<T> = Result<T, DvomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DvomError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = DvomError::snapshot_not_found("db-data");
        assert_eq!(err.to_string(), "Snapshot not found: db-data");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resource_limit_display() {
        let err = DvomError::ResourceLimit { limit: 1024 };
        assert_eq!(err.to_string(), "Size limit exceeded: more than 1024 bytes");
        assert!(err.is_resource_limit());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let dvom_err: DvomError = io_err.into();
        assert!(matches!(dvom_err, DvomError::Io(_)));
    }

    #[test]
    fn test_wrapped_error_survives_io_round_trip() {
        let io_err = DvomError::Authentication("chunk 3".into()).into_io();
        let back: DvomError = io_err.into();
        assert!(back.is_authentication());
        assert_eq!(back.to_string(), "Authentication failed: chunk 3");
    }

    #[test]
    fn test_pipeline_error_keeps_both_failures() {
        let err = DvomError::Sandbox("tar exited with code 2".into())
            .with_restart_failures(vec!["web: port in use".into()]);

        assert!(matches!(err.root(), DvomError::Sandbox(_)));
        let message = err.to_string();
        assert!(message.contains("tar exited with code 2"));
        assert!(message.contains("web: port in use"));
    }

    #[test]
    fn test_empty_restart_failures_leave_error_unwrapped() {
        let err = DvomError::Cancelled("deadline".into()).with_restart_failures(Vec::new());
        assert!(matches!(err, DvomError::Cancelled(_)));
        assert!(err.is_cancelled());
    }
}
