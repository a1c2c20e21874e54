//! Combines per-member training statuses into one ensemble-wide stream.
//!
//! Epoch `e` is published once every member still in play has reported `e`;
//! members that fail drop out and stop gating.

use serde::{Deserialize, Serialize};

use crate::ml::ensemble::MemberStatus;
use crate::ml::mlp::EpochMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingPhase {
    Start,
    Epoch,
    Success,
    Error,
}

/// One ensemble-wide training update.
///
/// Serializes as `{"status": "epoch", "epoch": 3, "epochs": 20, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub status: TrainingPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<usize>,
    pub epochs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EpochMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrainingStatus {
    pub fn start(epochs: usize) -> Self {
        Self {
            status: TrainingPhase::Start,
            epoch: None,
            epochs,
            data: None,
            error: None,
        }
    }

    pub fn epoch(epoch: usize, epochs: usize, data: EpochMetrics) -> Self {
        Self {
            status: TrainingPhase::Epoch,
            epoch: Some(epoch),
            epochs,
            data: Some(data),
            error: None,
        }
    }

    pub fn success(epochs: usize, data: Option<EpochMetrics>) -> Self {
        Self {
            status: TrainingPhase::Success,
            epoch: None,
            epochs,
            data,
            error: None,
        }
    }

    pub fn error(epochs: usize, message: impl Into<String>) -> Self {
        Self {
            status: TrainingPhase::Error,
            epoch: None,
            epochs,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TrainingPhase::Success | TrainingPhase::Error)
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Running,
    Succeeded(EpochMetrics),
    Failed(String),
}

#[derive(Debug, Clone)]
struct MemberProgress {
    epochs: Vec<EpochMetrics>,
    outcome: Outcome,
}

impl MemberProgress {
    fn gating(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Slowest-gates aggregation barrier over one fit.
#[derive(Debug, Clone)]
pub struct ProgressCombiner {
    epochs: usize,
    next_epoch: usize,
    members: Vec<MemberProgress>,
}

impl ProgressCombiner {
    pub fn new(members: usize, epochs: usize) -> Self {
        Self {
            epochs,
            next_epoch: 0,
            members: vec![
                MemberProgress {
                    epochs: Vec::new(),
                    outcome: Outcome::Running,
                };
                members
            ],
        }
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Feed one member update; returns any combined epochs it unblocked.
    pub fn record(&mut self, member: usize, status: &MemberStatus) -> Vec<TrainingStatus> {
        let Some(progress) = self.members.get_mut(member) else {
            return Vec::new();
        };
        match status {
            MemberStatus::Start { .. } => {}
            MemberStatus::Epoch { epoch, metrics } => {
                // Epochs arrive in order per member; anything else is stale.
                if *epoch == progress.epochs.len() {
                    progress.epochs.push(*metrics);
                }
            }
            MemberStatus::Success { metrics } => progress.outcome = Outcome::Succeeded(*metrics),
            MemberStatus::Error { reason } => progress.outcome = Outcome::Failed(reason.to_string()),
        }
        self.drain()
    }

    /// Mark members that never reported a terminal status as failed.
    pub fn abandon_unfinished(&mut self) -> Vec<TrainingStatus> {
        for progress in &mut self.members {
            if matches!(progress.outcome, Outcome::Running) {
                progress.outcome = Outcome::Failed("member exited without reporting".into());
            }
        }
        self.drain()
    }

    pub fn is_finished(&self) -> bool {
        self.members
            .iter()
            .all(|progress| !matches!(progress.outcome, Outcome::Running))
    }

    pub fn succeeded(&self) -> usize {
        self.members
            .iter()
            .filter(|progress| matches!(progress.outcome, Outcome::Succeeded(_)))
            .count()
    }

    /// Terminal status: success with the mean final metrics of the members
    /// that succeeded, or an error when none did.
    pub fn finish(&self) -> TrainingStatus {
        let finals: Vec<EpochMetrics> = self
            .members
            .iter()
            .filter_map(|progress| match &progress.outcome {
                Outcome::Succeeded(metrics) => Some(*metrics),
                _ => None,
            })
            .collect();
        if !finals.is_empty() {
            return TrainingStatus::success(self.epochs, mean_metrics(&finals));
        }
        let reasons: Vec<&str> = self
            .members
            .iter()
            .filter_map(|progress| match &progress.outcome {
                Outcome::Failed(reason) => Some(reason.as_str()),
                _ => None,
            })
            .collect();
        let message = match reasons.first() {
            Some(first) => format!("all {} members failed: {first}", reasons.len()),
            None => "ensemble has no members".to_string(),
        };
        TrainingStatus::error(self.epochs, message)
    }

    fn drain(&mut self) -> Vec<TrainingStatus> {
        let mut ready = Vec::new();
        while self.next_epoch < self.epochs {
            let epoch = self.next_epoch;
            let gating: Vec<&MemberProgress> =
                self.members.iter().filter(|progress| progress.gating()).collect();
            if gating.is_empty() || gating.iter().any(|progress| progress.epochs.len() <= epoch) {
                break;
            }
            let rows: Vec<EpochMetrics> = gating.iter().map(|progress| progress.epochs[epoch]).collect();
            if let Some(data) = mean_metrics(&rows) {
                ready.push(TrainingStatus::epoch(epoch, self.epochs, data));
            }
            self.next_epoch += 1;
        }
        ready
    }
}

/// Mean over members. Validation values are averaged only when every member
/// reported them.
pub fn mean_metrics(rows: &[EpochMetrics]) -> Option<EpochMetrics> {
    if rows.is_empty() {
        return None;
    }
    let n = rows.len() as f32;
    let mean_of = |pick: fn(&EpochMetrics) -> Option<f32>| -> Option<f32> {
        let values: Option<Vec<f32>> = rows.iter().map(pick).collect();
        values.map(|values| values.iter().sum::<f32>() / n)
    };
    Some(EpochMetrics {
        accuracy: rows.iter().map(|m| m.accuracy).sum::<f32>() / n,
        loss: rows.iter().map(|m| m.loss).sum::<f32>() / n,
        val_accuracy: mean_of(|m| m.val_accuracy),
        val_loss: mean_of(|m| m.val_loss),
    })
}
