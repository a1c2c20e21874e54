use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::ml::ensemble::BankSettings;
use crate::ml::mlp::TrainOptions;

/// Tunables for the ensemble classifier and its training runs.
///
/// Every field has a default, so a partial or empty TOML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub ensemble: EnsembleSettings,
    #[serde(default)]
    pub dataset: DatasetSettings,
    /// Seed for model initialization, splits and shuffles. `None` draws fresh
    /// entropy for every run.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ensemble: EnsembleSettings::default(),
            dataset: DatasetSettings::default(),
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Clamp values into ranges the engine accepts.
    pub fn normalized(mut self) -> Self {
        self.ensemble.num_models = clamp_num_models(self.ensemble.num_models);
        self.ensemble.layers = clamp_layers(self.ensemble.layers);
        self.ensemble.epochs = self.ensemble.epochs.max(1);
        self.ensemble.batch_size = self.ensemble.batch_size.max(1);
        self.ensemble.learning_rate = clamp_learning_rate(self.ensemble.learning_rate);
        self.dataset.train_proportion = clamp_train_proportion(self.dataset.train_proportion);
        self.dataset.min_samples_for_fit = self.dataset.min_samples_for_fit.max(1);
        self.dataset.default_input_dim = self.dataset.default_input_dim.max(1);
        self
    }
}

/// Ensemble architecture and optimizer settings.
///
/// Config keys: `num_models`, `layers`, `epochs`, `batch_size`, `learning_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSettings {
    #[serde(default = "default_num_models")]
    pub num_models: usize,
    /// Hidden layer widths, input side first.
    #[serde(default = "default_layers")]
    pub layers: Vec<usize>,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            num_models: default_num_models(),
            layers: default_layers(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
        }
    }
}

impl EnsembleSettings {
    pub fn bank_settings(&self) -> BankSettings {
        BankSettings {
            num_models: self.num_models,
            hidden: self.layers.clone(),
        }
    }

    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
        }
    }
}

/// Dataset split settings.
///
/// Config keys: `train_proportion`, `min_samples_for_fit`, `default_input_dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSettings {
    #[serde(default = "default_train_proportion")]
    pub train_proportion: f32,
    /// Below this many stored samples a run only initializes the architecture.
    #[serde(default = "default_min_samples_for_fit")]
    pub min_samples_for_fit: usize,
    /// Input width used to build the ensemble while the store is empty.
    #[serde(default = "default_input_dim")]
    pub default_input_dim: usize,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            train_proportion: default_train_proportion(),
            min_samples_for_fit: default_min_samples_for_fit(),
            default_input_dim: default_input_dim(),
        }
    }
}
