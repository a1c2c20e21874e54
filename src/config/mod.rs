//! Engine configuration persisted as TOML.

mod defaults;
mod errors;
mod io;
mod types;

pub use errors::ConfigError;
pub use io::{CONFIG_FILE_NAME, config_path, load_categories, load_from, load_or_default, save_to};
pub use types::{DatasetSettings, EngineConfig, EnsembleSettings};

#[cfg(test)]
mod tests;
