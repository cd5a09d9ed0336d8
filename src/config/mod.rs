//! Configuration module for dvom
//!
//! This module provides configuration management including:
//! - config directory resolution
//! - persisted defaults for storage and the backup pipeline

pub mod paths;
pub mod settings;

pub use paths::DvomPaths;
pub use settings::Settings;
