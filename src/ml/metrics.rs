//! Evaluation metrics for classification models.

#[derive(Debug, Clone)]
/// Confusion matrix for a `K`-class classifier.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Precision/recall statistics for a single class.
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Total number of true examples for the class.
    pub support: u32,
}

/// Compute per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    (0..k)
        .map(|class_idx| {
            let tp = cm.get(class_idx, class_idx) as f32;
            let mut fp = 0f32;
            let mut fn_ = 0f32;
            let mut support = 0u32;
            for j in 0..k {
                let v = cm.get(class_idx, j);
                support = support.saturating_add(v);
                if j != class_idx {
                    fn_ += v as f32;
                    fp += cm.get(j, class_idx) as f32;
                }
            }
            PerClassStats {
                precision: if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) },
                recall: if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) },
                support,
            }
        })
        .collect()
}

/// Overall accuracy; zero for an empty matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let total = cm.total();
    if total == 0 {
        return 0.0;
    }
    let correct: u64 = (0..cm.n_classes).map(|k| u64::from(cm.get(k, k))).sum();
    correct as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_and_per_class_stats() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(5, 0);
        assert_eq!(cm.total(), 4);
        assert!((accuracy(&cm) - 0.75).abs() < 1e-6);

        let stats = precision_recall_by_class(&cm);
        assert_eq!(stats[0].support, 3);
        assert!((stats[0].precision - 1.0).abs() < 1e-6);
        assert!((stats[0].recall - 2.0 / 3.0).abs() < 1e-6);
        assert!((stats[1].precision - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_matrix_has_zero_accuracy() {
        assert_eq!(accuracy(&ConfusionMatrix::new(3)), 0.0);
    }
}
