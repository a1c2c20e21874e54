use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MODEL_VERSION: i64 = 1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model has no layers")]
    NoLayers,
    #[error("Invalid architecture: input_dim={input_dim}, num_classes={num_classes}")]
    InvalidArchitecture { input_dim: usize, num_classes: usize },
    #[error("Layer {layer} weights length mismatch")]
    WeightsLength { layer: usize },
    #[error("Layer {layer} bias length mismatch")]
    BiasLength { layer: usize },
    #[error("Layer {layer} expects {expected} inputs but previous layer yields {actual}")]
    LayerChain {
        layer: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Input has {actual} features (expected {expected})")]
    InputDim { expected: usize, actual: usize },
}

/// Layer widths of a feed-forward classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MlpArchitecture {
    pub input_dim: usize,
    /// ReLU hidden layer widths, input side first.
    pub hidden: Vec<usize>,
    pub num_classes: usize,
}

impl MlpArchitecture {
    pub fn new(input_dim: usize, hidden: Vec<usize>, num_classes: usize) -> Self {
        Self {
            input_dim,
            hidden,
            num_classes,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.input_dim == 0 || self.num_classes == 0 || self.hidden.contains(&0) {
            return Err(ModelError::InvalidArchitecture {
                input_dim: self.input_dim,
                num_classes: self.num_classes,
            });
        }
        Ok(())
    }

    /// Create a model with Glorot-uniform weights and zero biases.
    pub fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<MlpModel, ModelError> {
        self.validate()?;
        let mut widths = Vec::with_capacity(self.hidden.len() + 2);
        widths.push(self.input_dim);
        widths.extend_from_slice(&self.hidden);
        widths.push(self.num_classes);

        let layers = widths
            .windows(2)
            .map(|pair| DenseLayer::glorot(pair[0], pair[1], rng))
            .collect();
        Ok(MlpModel {
            model_version: MODEL_VERSION,
            layers,
        })
    }
}

/// Fully connected layer; `weights` is row-major `output_dim x input_dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub input_dim: usize,
    pub output_dim: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl DenseLayer {
    fn glorot<R: Rng + ?Sized>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (input_dim + output_dim) as f32).sqrt();
        let weights = (0..input_dim * output_dim)
            .map(|_| rng.random_range(-limit..=limit))
            .collect();
        Self {
            input_dim,
            output_dim,
            weights,
            bias: vec![0.0; output_dim],
        }
    }

    pub(crate) fn forward_into(&self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.reserve(self.output_dim);
        for o in 0..self.output_dim {
            let base = o * self.input_dim;
            let mut sum = self.bias[o];
            for i in 0..self.input_dim {
                sum += self.weights[base + i] * input[i];
            }
            out.push(sum);
        }
    }

    fn is_finite(&self) -> bool {
        self.weights.iter().chain(self.bias.iter()).all(|v| v.is_finite())
    }
}

/// Feed-forward classifier: ReLU hidden layers and a softmax output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    pub model_version: i64,
    pub layers: Vec<DenseLayer>,
}

impl MlpModel {
    pub fn validate(&self) -> Result<(), ModelError> {
        let first = self.layers.first().ok_or(ModelError::NoLayers)?;
        let mut expected_input = first.input_dim;
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.input_dim != expected_input {
                return Err(ModelError::LayerChain {
                    layer: idx,
                    expected: layer.input_dim,
                    actual: expected_input,
                });
            }
            if layer.input_dim == 0 || layer.output_dim == 0 {
                return Err(ModelError::InvalidArchitecture {
                    input_dim: layer.input_dim,
                    num_classes: layer.output_dim,
                });
            }
            if layer.weights.len() != layer.input_dim * layer.output_dim {
                return Err(ModelError::WeightsLength { layer: idx });
            }
            if layer.bias.len() != layer.output_dim {
                return Err(ModelError::BiasLength { layer: idx });
            }
            expected_input = layer.output_dim;
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(|layer| layer.input_dim).unwrap_or(0)
    }

    pub fn num_classes(&self) -> usize {
        self.layers.last().map(|layer| layer.output_dim).unwrap_or(0)
    }

    /// True when every weight and bias is finite.
    pub fn is_finite(&self) -> bool {
        self.layers.iter().all(DenseLayer::is_finite)
    }

    /// Class probabilities for one feature vector.
    pub fn predict_proba(&self, features: &[f32]) -> Result<Vec<f32>, ModelError> {
        if features.len() != self.input_dim() {
            return Err(ModelError::InputDim {
                expected: self.input_dim(),
                actual: features.len(),
            });
        }
        let mut current = features.to_vec();
        let mut next = Vec::new();
        let last = self.layers.len().saturating_sub(1);
        for (idx, layer) in self.layers.iter().enumerate() {
            layer.forward_into(&current, &mut next);
            if idx < last {
                relu_inplace(&mut next);
            }
            std::mem::swap(&mut current, &mut next);
        }
        Ok(softmax(&current))
    }

    pub fn predict_class_index(&self, features: &[f32]) -> Result<usize, ModelError> {
        let proba = self.predict_proba(features)?;
        Ok(arg_max(&proba).unwrap_or(0))
    }
}

pub(crate) fn relu_inplace(values: &mut [f32]) {
    for v in values.iter_mut() {
        *v = v.max(0.0);
    }
}

/// Numerically stable softmax. Falls back to uniform if every exponent underflows.
pub fn softmax(raw: &[f32]) -> Vec<f32> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut out: Vec<f32> = raw.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = out.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / raw.len() as f32;
        out.iter_mut().for_each(|v| *v = uniform);
        return out;
    }
    out.iter_mut().for_each(|v| *v /= sum);
    out
}

/// Index of the largest value; the first maximum wins ties.
pub fn arg_max(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in values.iter().enumerate() {
        match best {
            Some((_, best_val)) if !(value > best_val) => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}
