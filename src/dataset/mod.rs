//! Labeled feature storage and training/validation splitting.

mod category;
mod split;
mod store;

pub use category::{Category, LabelSet};
pub use split::{DEFAULT_TRAIN_PROPORTION, Split, SplitError, split_samples};
pub use store::{
    Sample, SampleId, SampleStore, StoreChange, StoreError, StoreEvent, StoreSnapshot,
};
