use ndarray::Array2;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::adam::{Adam, LayerGrads};
use super::model::{MlpModel, ModelError, arg_max, relu_inplace, softmax};
use crate::ml::metrics::{ConfusionMatrix, accuracy};

/// Probabilities are clipped to this floor before taking the log.
const LOG_EPSILON: f32 = 1e-7;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 8,
            learning_rate: 0.001,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainError {
    #[error("Split has {actual} {what} columns, model expects {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Training set is empty")]
    EmptyTrainingSet,
    #[error("Training diverged at epoch {epoch} (non-finite loss or parameters)")]
    Diverged { epoch: usize },
    #[error("Training superseded by a newer model generation")]
    Superseded,
    #[error("Invalid model: {0}")]
    Model(#[from] ModelError),
}

/// Metrics of one epoch. Validation values are absent when the split has no
/// validation rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub accuracy: f32,
    pub loss: f32,
    #[serde(rename = "accuracyVal")]
    pub val_accuracy: Option<f32>,
    #[serde(rename = "lossVal")]
    pub val_loss: Option<f32>,
}

/// Mini-batch trainer owning a private copy of the model and its optimizer state.
pub struct MlpTrainer {
    model: MlpModel,
    optimizer: Adam,
    batch_size: usize,
    grads: Vec<LayerGrads>,
    activations: Vec<Vec<f32>>,
}

impl MlpTrainer {
    pub fn new(model: MlpModel, options: &TrainOptions) -> Result<Self, TrainError> {
        model.validate()?;
        let optimizer = Adam::new(options.learning_rate, &model);
        let grads = LayerGrads::zeros_like(&model);
        let activations = vec![Vec::new(); model.layers.len() + 1];
        Ok(Self {
            model,
            optimizer,
            batch_size: options.batch_size.max(1),
            grads,
            activations,
        })
    }

    pub fn model(&self) -> &MlpModel {
        &self.model
    }

    /// Check that `x`/`y` match the model's input and output widths.
    pub fn check_shapes(&self, x: &Array2<f32>, y: &Array2<f32>) -> Result<(), TrainError> {
        check_shapes(&self.model, x, y)
    }

    /// One shuffled pass over the rows of `x`/`y`. Returns the epoch's
    /// training metrics.
    pub fn train_epoch<R: Rng + ?Sized>(
        &mut self,
        epoch: usize,
        x: &Array2<f32>,
        y: &Array2<f32>,
        rng: &mut R,
    ) -> Result<EpochMetrics, TrainError> {
        self.check_shapes(x, y)?;
        let n = x.nrows();
        if n == 0 {
            return Err(TrainError::EmptyTrainingSet);
        }
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(rng);

        let mut loss_sum = 0.0f64;
        let mut cm = ConfusionMatrix::new(self.model.num_classes());
        for batch in indices.chunks(self.batch_size) {
            LayerGrads::reset(&mut self.grads);
            for &idx in batch {
                let features = row(x, idx)?;
                let target = row(y, idx)?;
                let probs = self.backprop(features, target);
                loss_sum += f64::from(cross_entropy(probs, target));
                if let (Some(truth), Some(predicted)) = (arg_max(target), arg_max(probs)) {
                    cm.add(truth, predicted);
                }
            }
            LayerGrads::scale(&mut self.grads, 1.0 / batch.len() as f32);
            self.optimizer.step(&mut self.model, &self.grads);
        }

        let loss = (loss_sum / n as f64) as f32;
        if !loss.is_finite() || !self.model.is_finite() {
            return Err(TrainError::Diverged { epoch });
        }
        Ok(EpochMetrics {
            accuracy: accuracy(&cm),
            loss,
            val_accuracy: None,
            val_loss: None,
        })
    }

    /// Forward and backward pass for one row, accumulating into `self.grads`.
    /// Returns the output probabilities.
    fn backprop(&mut self, features: &[f32], target: &[f32]) -> &[f32] {
        let layers = &self.model.layers;
        let last = layers.len() - 1;
        self.activations[0].clear();
        self.activations[0].extend_from_slice(features);
        for (idx, layer) in layers.iter().enumerate() {
            let (done, rest) = self.activations.split_at_mut(idx + 1);
            layer.forward_into(&done[idx], &mut rest[0]);
            if idx < last {
                relu_inplace(&mut rest[0]);
            } else {
                let probs = softmax(&rest[0]);
                rest[0] = probs;
            }
        }

        // Softmax + cross-entropy gradient w.r.t. the output logits.
        let mut delta: Vec<f32> = self.activations[last + 1]
            .iter()
            .zip(target)
            .map(|(p, t)| p - t)
            .collect();
        for idx in (0..=last).rev() {
            let layer = &layers[idx];
            let input = &self.activations[idx];
            let grad = &mut self.grads[idx];
            for o in 0..layer.output_dim {
                let d = delta[o];
                grad.bias[o] += d;
                let base = o * layer.input_dim;
                for i in 0..layer.input_dim {
                    grad.weights[base + i] += d * input[i];
                }
            }
            if idx == 0 {
                break;
            }
            let mut prev = vec![0.0f32; layer.input_dim];
            for o in 0..layer.output_dim {
                let d = delta[o];
                let base = o * layer.input_dim;
                for i in 0..layer.input_dim {
                    prev[i] += layer.weights[base + i] * d;
                }
            }
            for (i, value) in prev.iter_mut().enumerate() {
                if input[i] <= 0.0 {
                    *value = 0.0;
                }
            }
            delta = prev;
        }
        &self.activations[last + 1]
    }
}

/// Mean cross-entropy loss and accuracy of `model` over `x`/`y`.
///
/// Returns `None` when there are no rows to evaluate.
pub fn evaluate(
    model: &MlpModel,
    x: &Array2<f32>,
    y: &Array2<f32>,
) -> Result<Option<(f32, f32)>, TrainError> {
    check_shapes(model, x, y)?;
    let n = x.nrows();
    if n == 0 {
        return Ok(None);
    }
    let mut loss_sum = 0.0f64;
    let mut cm = ConfusionMatrix::new(model.num_classes());
    for idx in 0..n {
        let target = row(y, idx)?;
        let probs = model.predict_proba(row(x, idx)?)?;
        loss_sum += f64::from(cross_entropy(&probs, target));
        if let (Some(truth), Some(predicted)) = (arg_max(target), arg_max(&probs)) {
            cm.add(truth, predicted);
        }
    }
    Ok(Some(((loss_sum / n as f64) as f32, accuracy(&cm))))
}

fn check_shapes(model: &MlpModel, x: &Array2<f32>, y: &Array2<f32>) -> Result<(), TrainError> {
    if x.ncols() != model.input_dim() {
        return Err(TrainError::ShapeMismatch {
            what: "feature",
            expected: model.input_dim(),
            actual: x.ncols(),
        });
    }
    if y.ncols() != model.num_classes() {
        return Err(TrainError::ShapeMismatch {
            what: "target",
            expected: model.num_classes(),
            actual: y.ncols(),
        });
    }
    if x.nrows() != y.nrows() {
        return Err(TrainError::ShapeMismatch {
            what: "row",
            expected: x.nrows(),
            actual: y.nrows(),
        });
    }
    Ok(())
}

fn row(matrix: &Array2<f32>, idx: usize) -> Result<&[f32], TrainError> {
    matrix
        .row(idx)
        .to_slice()
        .ok_or(TrainError::ShapeMismatch {
            what: "contiguous row",
            expected: matrix.ncols(),
            actual: 0,
        })
}

fn cross_entropy(probs: &[f32], target: &[f32]) -> f32 {
    probs
        .iter()
        .zip(target)
        .filter(|(_, t)| **t > 0.0)
        .map(|(p, t)| -t * p.max(LOG_EPSILON).ln())
        .sum()
}
