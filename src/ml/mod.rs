//! Classifier building blocks: the MLP, its ensemble, and output aggregation.

pub mod ensemble;
pub mod metrics;
pub mod mlp;
pub mod uncertainty;
