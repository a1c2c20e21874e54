//! Library exports for the demo binary, benchmarks and tests.
/// Application directory resolution.
pub mod app_dirs;
/// Engine configuration and category loading.
pub mod config;
/// Sample storage and training/validation splits.
pub mod dataset;
/// Classifier session tying the store, ensemble and trainer together.
pub mod engine;
/// Logging setup.
pub mod logging;
/// MLP ensemble and prediction aggregation.
pub mod ml;
/// Synthetic drawings for demos, tests and benchmarks.
pub mod sketch;

pub use engine::{Engine, EngineError, Feedback, FeedbackMatch, TrainerState, TrainingStatus};
pub use ml::uncertainty::PredictionResult;
