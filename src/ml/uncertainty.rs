//! Combines ensemble member outputs into one prediction and a consensus score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::LabelSet;
use crate::ml::mlp::arg_max;

/// Aggregated ensemble prediction.
///
/// `label == None` with all-zero confidences means no trained model was
/// available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: Option<String>,
    pub confidences: BTreeMap<String, f32>,
    /// Fraction of members voting for the most popular class.
    pub certainty: f32,
}

impl PredictionResult {
    /// Result returned while no ensemble member is trained.
    pub fn untrained(labels: &LabelSet) -> Self {
        Self {
            label: None,
            confidences: labels.names().iter().map(|name| (name.clone(), 0.0)).collect(),
            certainty: 0.0,
        }
    }

    pub fn is_untrained(&self) -> bool {
        self.label.is_none()
    }

    pub fn confidence(&self, label: &str) -> f32 {
        self.confidences.get(label).copied().unwrap_or(0.0)
    }

    /// Predicted label with its confidence, or `None` when nothing scored above zero.
    pub fn best(&self) -> Option<(&str, f32)> {
        let label = self.label.as_deref()?;
        let confidence = self.confidence(label);
        (confidence > 0.0).then_some((label, confidence))
    }
}

/// Element-wise mean of the member probability vectors, `classes` wide.
pub fn mean_softmax(probs: &[Vec<f32>], classes: usize) -> Vec<f32> {
    let mut avg = vec![0.0f32; classes];
    if probs.is_empty() {
        return avg;
    }
    let n = probs.len() as f32;
    for member in probs {
        for (j, slot) in avg.iter_mut().enumerate() {
            *slot += member.get(j).copied().unwrap_or(0.0) / n;
        }
    }
    avg
}

/// Variation ratio: the share of members whose own arg-max agrees with the most
/// common arg-max. Zero for an empty ensemble.
pub fn variation_ratio(probs: &[Vec<f32>]) -> f32 {
    let mut counters: BTreeMap<usize, usize> = BTreeMap::new();
    for member in probs {
        if let Some(idx) = arg_max(member) {
            *counters.entry(idx).or_default() += 1;
        }
    }
    let Some(&majority) = counters.values().max() else {
        return 0.0;
    };
    majority as f32 / probs.len() as f32
}

/// Aggregate member outputs against the label set.
pub fn aggregate(probs: &[Vec<f32>], labels: &LabelSet) -> PredictionResult {
    let all_zero = probs.iter().all(|member| member.iter().all(|&p| p == 0.0));
    if probs.is_empty() || labels.is_empty() || all_zero {
        return PredictionResult::untrained(labels);
    }
    let avg = mean_softmax(probs, labels.len());
    let label = arg_max(&avg)
        .and_then(|idx| labels.name(idx))
        .map(str::to_string);
    let confidences = labels
        .names()
        .iter()
        .cloned()
        .zip(avg.iter().copied())
        .collect();
    PredictionResult {
        label,
        confidences,
        certainty: variation_ratio(probs),
    }
}
