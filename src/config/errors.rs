use std::path::PathBuf;

use thiserror::Error;

use crate::app_dirs::AppDirError;

/// Errors that may occur while loading or saving engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The application directory could not be resolved.
    #[error("No usable config directory: {0}")]
    AppDir(#[from] AppDirError),
    /// Failed to create the config directory.
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to write a config file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to serialize config to TOML.
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    /// Failed to parse a category list.
    #[error("Invalid category list at {path}: {source}")]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },
}
