use ndarray::Array2;
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

use super::{LabelSet, SampleId, StoreSnapshot};

/// Fraction of each label's samples that goes to training by default.
pub const DEFAULT_TRAIN_PROPORTION: f32 = 0.75;

/// Slack applied before flooring `p * n` so that values such as `0.7f32` do not
/// lose a row to binary representation error.
const PROPORTION_SLACK: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("Label set is empty")]
    EmptyLabelSet,
    #[error("Training proportion must be in (0, 1], got {0}")]
    InvalidProportion(f32),
    #[error("Failed to assemble split matrix: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Training/validation partition of one store snapshot.
///
/// Rows of `*_x` are feature vectors; rows of `*_y` are one-hot targets over
/// the label set. `*_ids` list the samples behind each row, in row order.
#[derive(Debug, Clone)]
pub struct Split {
    pub training_x: Array2<f32>,
    pub training_y: Array2<f32>,
    pub validation_x: Array2<f32>,
    pub validation_y: Array2<f32>,
    pub training_ids: Vec<SampleId>,
    pub validation_ids: Vec<SampleId>,
}

impl Split {
    pub fn input_dim(&self) -> usize {
        self.training_x.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.training_y.ncols()
    }

    pub fn training_len(&self) -> usize {
        self.training_x.nrows()
    }

    pub fn validation_len(&self) -> usize {
        self.validation_x.nrows()
    }
}

#[derive(Default)]
struct Rows {
    x: Vec<f32>,
    y: Vec<f32>,
    ids: Vec<SampleId>,
}

impl Rows {
    fn push(&mut self, id: SampleId, features: &[f32], target: &[f32]) {
        self.x.extend_from_slice(features);
        self.y.extend_from_slice(target);
        self.ids.push(id);
    }

    fn into_matrices(
        self,
        dim: usize,
        classes: usize,
    ) -> Result<(Array2<f32>, Array2<f32>, Vec<SampleId>), SplitError> {
        let n = self.ids.len();
        let x = Array2::from_shape_vec((n, dim), self.x)?;
        let y = Array2::from_shape_vec((n, classes), self.y)?;
        Ok((x, y, self.ids))
    }
}

/// Partition every label of `labels` that has samples into training and
/// validation rows.
///
/// Each label's ids are shuffled independently; the first
/// `floor(train_proportion * n)` go to training. Store labels outside the label
/// set are ignored.
pub fn split_samples<R: Rng + ?Sized>(
    snapshot: &StoreSnapshot,
    labels: &LabelSet,
    train_proportion: f32,
    rng: &mut R,
) -> Result<Split, SplitError> {
    if labels.is_empty() {
        return Err(SplitError::EmptyLabelSet);
    }
    if !(train_proportion > 0.0 && train_proportion <= 1.0) {
        return Err(SplitError::InvalidProportion(train_proportion));
    }
    let dim = snapshot.dim.unwrap_or(0);
    let classes = labels.len();
    let mut training = Rows::default();
    let mut validation = Rows::default();

    for (class_idx, label) in labels.names().iter().enumerate() {
        let ids = snapshot.ids_for_label(label);
        if ids.is_empty() {
            continue;
        }
        let mut shuffled = ids.to_vec();
        shuffled.shuffle(rng);
        let n = shuffled.len();
        let train_count =
            ((f64::from(train_proportion) * n as f64 + PROPORTION_SLACK).floor() as usize).min(n);
        let mut target = vec![0.0f32; classes];
        target[class_idx] = 1.0;

        for (position, id) in shuffled.into_iter().enumerate() {
            let Some(sample) = snapshot.get(&id) else {
                continue;
            };
            let rows = if position < train_count {
                &mut training
            } else {
                &mut validation
            };
            rows.push(id, sample.features(), &target);
        }
    }

    let (training_x, training_y, training_ids) = training.into_matrices(dim, classes)?;
    let (validation_x, validation_y, validation_ids) = validation.into_matrices(dim, classes)?;
    tracing::debug!(
        "Split {} samples: {} training, {} validation across {} labels",
        snapshot.len(),
        training_ids.len(),
        validation_ids.len(),
        classes
    );
    Ok(Split {
        training_x,
        training_y,
        validation_x,
        validation_y,
        training_ids,
        validation_ids,
    })
}
