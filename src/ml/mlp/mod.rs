//! Feed-forward classifier over feature vectors, trained with Adam.

mod adam;
mod model;
mod train;

pub use adam::{Adam, LayerGrads};
pub use model::{DenseLayer, MlpArchitecture, MlpModel, ModelError, arg_max, softmax};
pub use train::{EpochMetrics, MlpTrainer, TrainError, TrainOptions, evaluate};
