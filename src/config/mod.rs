//! Configuration module
//!
//! Handles the serial line defaults, link timings and log level

mod settings;

pub use settings::{AppConfig, ConfigError, LoggingConfig, SerialSettings};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "replink", "replink").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
