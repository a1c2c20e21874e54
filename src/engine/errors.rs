use thiserror::Error;

use super::embed::ExtractError;
use crate::dataset::StoreError;
use crate::ml::ensemble::EnsembleError;

/// Errors surfaced synchronously by [`super::Engine`] calls.
///
/// Per-member training failures never show up here; they are reported on the
/// training status stream.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid label {label:?}")]
    InvalidLabel { label: String },
    #[error("Feature extraction failed: {0}")]
    FeatureExtractionFailed(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    #[error("Nothing was predicted, so there is no label to confirm")]
    NothingToConfirm,
    #[error("Failed to start training worker: {0}")]
    Worker(#[source] std::io::Error),
}
