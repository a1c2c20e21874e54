use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::app_dirs;
use crate::dataset::Category;

use super::{ConfigError, EngineConfig};

/// Default filename used to store the engine configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolve the configuration file path inside the application directory.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from the application directory, returning defaults if missing.
pub fn load_or_default() -> Result<EngineConfig, ConfigError> {
    load_from(&config_path()?)
}

/// Load configuration from `path`. A missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: EngineConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config.normalized())
}

/// Write the configuration as TOML, replacing the file atomically.
pub fn save_to(config: &EngineConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, data.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let tmp_path = path.with_extension("toml.tmp");
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(&tmp_path).map_err(write_err)?;
    file.write_all(data).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);
    std::fs::rename(&tmp_path, path).map_err(write_err)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CategoryFile {
    List(Vec<Category>),
    Wrapped { categories: Vec<Category> },
}

/// Load a category list from JSON.
///
/// Accepts either a bare array of `{id, name}` objects or an object with a
/// `categories` array, the shape used by the dataset metadata files.
pub fn load_categories(path: &Path) -> Result<Vec<Category>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: CategoryFile =
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(match parsed {
        CategoryFile::List(categories) => categories,
        CategoryFile::Wrapped { categories } => categories,
    })
}
