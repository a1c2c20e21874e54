use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use rand::rngs::StdRng;
use tracing::{debug, warn};

use super::member::{Member, MemberHealth};
use super::status::{MemberEvent, MemberStatus};
use crate::dataset::Split;
use crate::ml::mlp::{EpochMetrics, MlpModel, MlpTrainer, TrainError, TrainOptions, evaluate};

/// Everything one member's training thread owns.
pub(super) struct MemberJob {
    pub index: usize,
    pub generation: u64,
    pub live: Arc<AtomicU64>,
    pub member: Arc<Member>,
    pub split: Arc<Split>,
    pub options: TrainOptions,
    pub rng: StdRng,
    pub tx: Sender<MemberEvent>,
}

impl MemberJob {
    pub(super) fn run(mut self) {
        self.send(MemberStatus::Start {
            epochs: self.options.epochs,
        });
        let status = match self.train() {
            Ok(metrics) => {
                self.member.set_health(MemberHealth::Ready);
                debug!(
                    "Member {} finished: loss {:.4}, accuracy {:.3}",
                    self.index, metrics.loss, metrics.accuracy
                );
                MemberStatus::Success { metrics }
            }
            Err(TrainError::Superseded) => {
                debug!("Member {} stopped: generation {} superseded", self.index, self.generation);
                MemberStatus::Error {
                    reason: TrainError::Superseded,
                }
            }
            Err(reason) => {
                self.member.set_health(MemberHealth::Failed);
                warn!("Member {} failed: {reason}", self.index);
                MemberStatus::Error { reason }
            }
        };
        self.send(status);
    }

    fn train(&mut self) -> Result<EpochMetrics, TrainError> {
        let start = self.member.snapshot();
        let mut trainer = MlpTrainer::new(MlpModel::clone(&start), &self.options)?;
        let split = Arc::clone(&self.split);
        trainer.check_shapes(&split.training_x, &split.training_y)?;

        let mut last = None;
        for epoch in 0..self.options.epochs {
            if self.live.load(Ordering::SeqCst) != self.generation {
                return Err(TrainError::Superseded);
            }
            let mut metrics =
                trainer.train_epoch(epoch, &split.training_x, &split.training_y, &mut self.rng)?;
            if let Some((loss, accuracy)) =
                evaluate(trainer.model(), &split.validation_x, &split.validation_y)?
            {
                if !loss.is_finite() {
                    return Err(TrainError::Diverged { epoch });
                }
                metrics.val_loss = Some(loss);
                metrics.val_accuracy = Some(accuracy);
            }
            self.member
                .publish(self.generation, &self.live, trainer.model().clone())?;
            self.send(MemberStatus::Epoch { epoch, metrics });
            last = Some(metrics);
        }
        last.ok_or(TrainError::EmptyTrainingSet)
    }

    fn send(&self, status: MemberStatus) {
        // The receiver may have been dropped by a caller that stopped listening.
        let _ = self.tx.send(MemberEvent {
            member: self.index,
            generation: self.generation,
            status,
        });
    }
}

/// Handle to a running ensemble fit.
///
/// Events arrive in per-member order; members interleave freely. The channel
/// disconnects once every member thread has exited.
pub struct FitHandle {
    generation: u64,
    members: usize,
    epochs: usize,
    events: Receiver<MemberEvent>,
    threads: Vec<JoinHandle<()>>,
}

impl FitHandle {
    pub(super) fn new(
        generation: u64,
        epochs: usize,
        events: Receiver<MemberEvent>,
        threads: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            generation,
            members: threads.len(),
            epochs,
            events,
            threads,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn members(&self) -> usize {
        self.members
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn events(&self) -> &Receiver<MemberEvent> {
        &self.events
    }

    /// Block until every member thread exits. Returns how many panicked.
    pub fn join(self) -> usize {
        drop(self.events);
        self.threads
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count()
    }

    /// Drain every event, then join. Convenience for callers without progress UI.
    pub fn wait(self) -> Vec<MemberEvent> {
        let events: Vec<MemberEvent> = self.events.iter().collect();
        let panicked = self
            .threads
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        if panicked > 0 {
            warn!("{panicked} ensemble member thread(s) panicked");
        }
        events
    }
}
