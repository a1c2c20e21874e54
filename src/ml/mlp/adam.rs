//! Adam optimizer over the dense layers of an [`MlpModel`].

use super::model::MlpModel;

pub const DEFAULT_BETA1: f32 = 0.9;
pub const DEFAULT_BETA2: f32 = 0.999;
pub const DEFAULT_EPSILON: f32 = 1e-7;

/// Accumulated gradients for one dense layer, same layout as the layer.
#[derive(Debug, Clone)]
pub struct LayerGrads {
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl LayerGrads {
    pub fn zeros_like(model: &MlpModel) -> Vec<LayerGrads> {
        model
            .layers
            .iter()
            .map(|layer| LayerGrads {
                weights: vec![0.0; layer.weights.len()],
                bias: vec![0.0; layer.bias.len()],
            })
            .collect()
    }

    pub fn reset(grads: &mut [LayerGrads]) {
        for grad in grads {
            grad.weights.iter_mut().for_each(|g| *g = 0.0);
            grad.bias.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    pub fn scale(grads: &mut [LayerGrads], factor: f32) {
        for grad in grads {
            grad.weights.iter_mut().for_each(|g| *g *= factor);
            grad.bias.iter_mut().for_each(|g| *g *= factor);
        }
    }
}

#[derive(Debug, Clone)]
struct Moments {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Moments {
    fn zeros(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }
}

/// Adaptive moment estimation.
///
/// ```text
/// m = b1*m + (1-b1)*g
/// v = b2*v + (1-b2)*g^2
/// p = p - lr * sqrt(1-b2^t)/(1-b1^t) * m / (sqrt(v) + eps)
/// ```
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    t: i32,
    weights: Vec<Moments>,
    biases: Vec<Moments>,
}

impl Adam {
    pub fn new(learning_rate: f32, model: &MlpModel) -> Self {
        Self {
            learning_rate,
            beta1: DEFAULT_BETA1,
            beta2: DEFAULT_BETA2,
            epsilon: DEFAULT_EPSILON,
            t: 0,
            weights: model
                .layers
                .iter()
                .map(|layer| Moments::zeros(layer.weights.len()))
                .collect(),
            biases: model
                .layers
                .iter()
                .map(|layer| Moments::zeros(layer.bias.len()))
                .collect(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one update with already batch-averaged gradients.
    pub fn step(&mut self, model: &mut MlpModel, grads: &[LayerGrads]) {
        self.t = self.t.saturating_add(1);
        let correction1 = 1.0 - self.beta1.powi(self.t);
        let correction2 = 1.0 - self.beta2.powi(self.t);
        let step_size = self.learning_rate * correction2.sqrt() / correction1;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        for (idx, layer) in model.layers.iter_mut().enumerate() {
            let grad = &grads[idx];
            update(
                &mut layer.weights,
                &grad.weights,
                &mut self.weights[idx],
                step_size,
                beta1,
                beta2,
                epsilon,
            );
            update(
                &mut layer.bias,
                &grad.bias,
                &mut self.biases[idx],
                step_size,
                beta1,
                beta2,
                epsilon,
            );
        }
    }
}

fn update(
    params: &mut [f32],
    grads: &[f32],
    moments: &mut Moments,
    step_size: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
) {
    for i in 0..params.len() {
        let g = grads[i];
        moments.m[i] = beta1 * moments.m[i] + (1.0 - beta1) * g;
        moments.v[i] = beta2 * moments.v[i] + (1.0 - beta2) * g * g;
        params[i] -= step_size * moments.m[i] / (moments.v[i].sqrt() + epsilon);
    }
}
