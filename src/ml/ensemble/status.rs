use crate::ml::mlp::{EpochMetrics, TrainError};

/// Progress of a single member's fit.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberStatus {
    Start { epochs: usize },
    /// Epoch `epoch` (0-based) finished and its parameters were published.
    Epoch { epoch: usize, metrics: EpochMetrics },
    /// Every epoch finished; carries the last epoch's metrics.
    Success { metrics: EpochMetrics },
    Error { reason: TrainError },
}

impl MemberStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Error { .. })
    }
}

/// A status update tagged with its member and model generation.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberEvent {
    pub member: usize,
    pub generation: u64,
    pub status: MemberStatus,
}
