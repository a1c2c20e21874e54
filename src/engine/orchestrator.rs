//! Background worker that turns store changes into ensemble training runs.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::progress::{ProgressCombiner, TrainingStatus};
use crate::config::EngineConfig;
use crate::dataset::{LabelSet, SampleStore, StoreChange, StoreEvent, StoreSnapshot, split_samples};
use crate::ml::ensemble::{EnsembleBank, MemberStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerState {
    Idle,
    Splitting,
    Training,
    Succeeded,
    Failed,
}

/// Why a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    SampleAdded,
    StoreCleared,
    Retrain,
}

impl From<&StoreEvent> for Trigger {
    fn from(event: &StoreEvent) -> Self {
        match event.change {
            StoreChange::Created { .. } => Trigger::SampleAdded,
            StoreChange::Cleared { .. } => Trigger::StoreCleared,
        }
    }
}

enum Command {
    Run(Trigger),
    Shutdown,
}

/// Counters describing the worker's recent activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingReport {
    pub state: TrainerState,
    /// Completed runs, including build-only ones.
    pub runs: u64,
    /// Terminal state of the latest run that trained, if any did.
    pub last_outcome: Option<TrainerState>,
    /// Samples held by the store when the latest run started.
    pub last_sample_count: usize,
}

struct Status {
    report: TrainingReport,
    queued: usize,
}

struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
    subscribers: Mutex<Vec<Sender<TrainingStatus>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new(Status {
                report: TrainingReport {
                    state: TrainerState::Idle,
                    runs: 0,
                    last_outcome: None,
                    last_sample_count: 0,
                },
                queued: 0,
            }),
            changed: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: TrainerState) {
        self.lock().report.state = state;
        self.changed.notify_all();
    }

    /// Take `consumed` queued triggers and enter `Splitting` in one step so
    /// waiters never observe an idle worker with work pending.
    fn begin_run(&self, consumed: usize) {
        let mut status = self.lock();
        status.queued = status.queued.saturating_sub(consumed);
        status.report.state = TrainerState::Splitting;
        drop(status);
        self.changed.notify_all();
    }

    fn finish_run(&self, outcome: Option<TrainerState>, samples: usize) {
        if let Some(outcome) = outcome {
            self.set_state(outcome);
        }
        let mut status = self.lock();
        status.report.state = TrainerState::Idle;
        status.report.runs += 1;
        status.report.last_sample_count = samples;
        if outcome.is_some() {
            status.report.last_outcome = outcome;
        }
        drop(status);
        self.changed.notify_all();
    }

    fn publish(&self, status: TrainingStatus) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(status.clone()).is_ok());
    }
}

/// Cloneable handle for requesting runs.
#[derive(Clone)]
pub(crate) struct TriggerSender {
    tx: Sender<Command>,
    shared: Arc<Shared>,
}

impl TriggerSender {
    pub(crate) fn send(&self, trigger: Trigger) {
        let mut status = self.shared.lock();
        status.queued += 1;
        if self.tx.send(Command::Run(trigger)).is_err() {
            status.queued -= 1;
        }
    }
}

/// What the worker trains against.
pub(crate) struct TrainingContext {
    pub store: Arc<SampleStore>,
    pub bank: Arc<EnsembleBank>,
    pub labels: Arc<RwLock<LabelSet>>,
    pub config: EngineConfig,
}

/// Owns the training worker thread.
pub(crate) struct Orchestrator {
    trigger: TriggerSender,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub(crate) fn spawn(ctx: TrainingContext) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared::new());
        let rng = match ctx.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let worker = Worker {
            ctx,
            shared: Arc::clone(&shared),
            rng,
        };
        let handle = thread::Builder::new()
            .name("drawlab-trainer".into())
            .spawn(move || worker.run(rx))?;
        Ok(Self {
            trigger: TriggerSender {
                tx,
                shared: Arc::clone(&shared),
            },
            shared,
            worker: Some(handle),
        })
    }

    pub(crate) fn trigger_sender(&self) -> TriggerSender {
        self.trigger.clone()
    }

    pub(crate) fn trigger(&self, trigger: Trigger) {
        self.trigger.send(trigger);
    }

    pub(crate) fn subscribe(&self) -> Receiver<TrainingStatus> {
        let (tx, rx) = mpsc::channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn report(&self) -> TrainingReport {
        self.shared.lock().report
    }

    /// Block until no run is active or queued. Returns `false` on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let status = self.shared.lock();
        let (_status, result) = self
            .shared
            .changed
            .wait_timeout_while(status, timeout, |status| {
                status.queued > 0 || status.report.state != TrainerState::Idle
            })
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    pub(crate) fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.trigger.tx.send(Command::Shutdown);
        if worker.join().is_err() {
            warn!("Training worker panicked");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Triggers received while a run was active.
#[derive(Debug, Default, PartialEq)]
struct Pending {
    latest: Option<Trigger>,
    count: usize,
    shutdown: bool,
}

fn drain_pending(rx: &Receiver<Command>) -> Pending {
    let mut pending = Pending::default();
    while let Ok(command) = rx.try_recv() {
        match command {
            Command::Run(trigger) => {
                pending.latest = Some(trigger);
                pending.count += 1;
            }
            Command::Shutdown => {
                pending.shutdown = true;
                break;
            }
        }
    }
    pending
}

struct Worker {
    ctx: TrainingContext,
    shared: Arc<Shared>,
    rng: StdRng,
}

impl Worker {
    fn run(mut self, rx: Receiver<Command>) {
        while let Ok(Command::Run(first)) = rx.recv() {
            self.shared.begin_run(1);
            let mut trigger = first;
            loop {
                self.run_once(trigger);
                let pending = drain_pending(&rx);
                if pending.shutdown {
                    debug!("Training worker stopped");
                    return;
                }
                let Some(next) = pending.latest else {
                    break;
                };
                if pending.count > 1 {
                    debug!("Coalesced {} triggers into one follow-up run", pending.count);
                }
                self.shared.begin_run(pending.count);
                trigger = next;
            }
        }
        debug!("Training worker stopped");
    }

    fn run_once(&mut self, trigger: Trigger) {
        let labels = self
            .ctx
            .labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let snapshot = self.ctx.store.snapshot();
        debug!(
            "Run triggered by {trigger:?} at revision {} ({} samples, {} labels)",
            snapshot.revision,
            snapshot.len(),
            labels.len()
        );
        let epochs = self.ctx.config.ensemble.epochs;
        let dim = snapshot
            .dim
            .unwrap_or(self.ctx.config.dataset.default_input_dim);

        let outcome = if labels.len() < 2 {
            warn!("Cannot train with {} label(s); need at least 2 classes", labels.len());
            self.shared.publish(TrainingStatus::start(epochs));
            self.shared
                .publish(TrainingStatus::error(epochs, "need at least 2 classes"));
            self.build_only(dim, labels.len());
            Some(TrainerState::Failed)
        } else if snapshot.len() < self.ctx.config.dataset.min_samples_for_fit {
            self.build_only(dim, labels.len());
            None
        } else {
            self.train(&snapshot, &labels, dim)
        };
        self.shared.finish_run(outcome, snapshot.len());
    }

    /// Fresh, untrained ensemble; no fit.
    fn build_only(&self, dim: usize, classes: usize) {
        match self.ctx.bank.build(dim, classes) {
            Ok(generation) => debug!("Initialized generation {generation} without fitting"),
            Err(err) => warn!("Failed to initialize ensemble: {err}"),
        }
    }

    fn train(
        &mut self,
        snapshot: &StoreSnapshot,
        labels: &LabelSet,
        dim: usize,
    ) -> Option<TrainerState> {
        let epochs = self.ctx.config.ensemble.epochs;
        let proportion = self.ctx.config.dataset.train_proportion;
        let split = match split_samples(snapshot, labels, proportion, &mut self.rng) {
            Ok(split) => split,
            Err(err) => {
                warn!("Failed to split samples: {err}");
                self.shared.publish(TrainingStatus::start(epochs));
                self.shared.publish(TrainingStatus::error(epochs, err.to_string()));
                return Some(TrainerState::Failed);
            }
        };
        if split.training_len() == 0 {
            debug!("No training rows for the current labels; initializing only");
            self.build_only(dim, labels.len());
            return None;
        }

        let (dim, classes) = (split.input_dim(), split.num_classes());
        let options = self.ctx.config.ensemble.train_options();
        let (training_rows, validation_rows) = (split.training_len(), split.validation_len());
        let started = {
            // `setup` rebuilds under the write side of this lock, so while it is
            // held the live generation belongs to the labels read here.
            let current = self.ctx.labels.read().unwrap_or_else(PoisonError::into_inner);
            if *current != *labels {
                debug!("Labels changed since the split; leaving the fit to the follow-up run");
                return None;
            }
            if self.ctx.bank.needs_rebuild(dim, classes)
                && let Err(err) = self.ctx.bank.build(dim, classes)
            {
                warn!("Failed to rebuild ensemble: {err}");
                self.shared.publish(TrainingStatus::start(epochs));
                self.shared.publish(TrainingStatus::error(epochs, err.to_string()));
                return Some(TrainerState::Failed);
            }
            self.shared.set_state(TrainerState::Training);
            self.ctx.bank.fit(Arc::new(split), &options)
        };
        let handle = match started {
            Ok(handle) => handle,
            Err(err) => {
                warn!("Failed to start ensemble fit: {err}");
                self.shared.publish(TrainingStatus::start(epochs));
                self.shared.publish(TrainingStatus::error(epochs, err.to_string()));
                return Some(TrainerState::Failed);
            }
        };
        info!(
            "Training generation {}: {} members, {} epochs, {training_rows} training / {validation_rows} validation rows",
            handle.generation(),
            handle.members(),
            handle.epochs()
        );
        self.shared.publish(TrainingStatus::start(handle.epochs()));

        let mut combiner = ProgressCombiner::new(handle.members(), handle.epochs());
        for event in handle.events().iter() {
            if event.generation != handle.generation() {
                continue;
            }
            if let MemberStatus::Epoch { epoch, metrics } = &event.status {
                debug!(
                    "Member {} epoch {epoch}: loss {:.4}, accuracy {:.3}",
                    event.member, metrics.loss, metrics.accuracy
                );
            }
            for status in combiner.record(event.member, &event.status) {
                self.shared.publish(status);
            }
        }
        for status in combiner.abandon_unfinished() {
            self.shared.publish(status);
        }
        let members = handle.members();
        let panicked = handle.join();
        if panicked > 0 {
            warn!("{panicked} member thread(s) panicked during training");
        }

        let done = combiner.finish();
        let state = if combiner.succeeded() > 0 {
            info!(
                "Training finished: {}/{} members succeeded",
                combiner.succeeded(),
                members
            );
            TrainerState::Succeeded
        } else {
            warn!("Training failed: {}", done.error.as_deref().unwrap_or("unknown error"));
            TrainerState::Failed
        };
        self.shared.publish(done);
        Some(state)
    }
}
