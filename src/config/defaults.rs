pub(super) const MAX_NUM_MODELS: usize = 32;
pub(super) const MAX_LAYER_WIDTH: usize = 4096;

pub(super) fn default_num_models() -> usize {
    5
}

pub(super) fn default_layers() -> Vec<usize> {
    vec![64, 32]
}

pub(super) fn default_epochs() -> usize {
    20
}

pub(super) fn default_batch_size() -> usize {
    8
}

pub(super) fn default_learning_rate() -> f32 {
    0.001
}

pub(super) fn default_train_proportion() -> f32 {
    0.75
}

pub(super) fn default_min_samples_for_fit() -> usize {
    2
}

/// Width of the pretrained sketch embedding used before any sample exists.
pub(super) fn default_input_dim() -> usize {
    1024
}

pub(super) fn clamp_num_models(value: usize) -> usize {
    value.clamp(1, MAX_NUM_MODELS)
}

pub(super) fn clamp_layers(layers: Vec<usize>) -> Vec<usize> {
    layers
        .into_iter()
        .filter(|&units| units > 0)
        .map(|units| units.min(MAX_LAYER_WIDTH))
        .collect()
}

pub(super) fn clamp_train_proportion(value: f32) -> f32 {
    if !value.is_finite() || value <= 0.0 {
        return default_train_proportion();
    }
    value.min(1.0)
}

pub(super) fn clamp_learning_rate(value: f32) -> f32 {
    if !value.is_finite() || value <= 0.0 {
        return default_learning_rate();
    }
    value
}
