//! Bank of independently initialised MLPs trained in parallel.
//!
//! Members belong to a generation. Rebuilding, installing or clearing the bank
//! bumps the live generation counter, which makes in-flight fits of the old
//! generation stop at their next epoch boundary without publishing.

mod fit;
mod member;
mod status;

pub use fit::FitHandle;
pub use member::MemberHealth;
pub use status::{MemberEvent, MemberStatus};

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::dataset::Split;
use crate::ml::mlp::{MlpArchitecture, MlpModel, ModelError, TrainOptions};
use fit::MemberJob;
use member::Member;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("Invalid ensemble architecture: {0}")]
    InvalidArchitecture(#[source] ModelError),
    #[error("No ensemble member has been trained")]
    NotTrained,
    #[error("Ensemble has not been built")]
    NotBuilt,
    #[error("Input has {actual} features (expected {expected})")]
    InputDim { expected: usize, actual: usize },
    #[error("Installed models must share one architecture")]
    MixedArchitectures,
    #[error("Cannot install an empty ensemble")]
    EmptyInstall,
    #[error("Failed to spawn training thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Shape of the ensemble: member count and hidden layer widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSettings {
    pub num_models: usize,
    pub hidden: Vec<usize>,
}

impl Default for BankSettings {
    fn default() -> Self {
        Self {
            num_models: 5,
            hidden: vec![64, 32],
        }
    }
}

/// Diagnostic view of the live generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleSummary {
    pub generation: u64,
    pub input_dim: usize,
    pub num_classes: usize,
    pub hidden: Vec<usize>,
    pub members: Vec<MemberHealth>,
}

impl EnsembleSummary {
    pub fn ready(&self) -> usize {
        self.members
            .iter()
            .filter(|health| **health == MemberHealth::Ready)
            .count()
    }
}

struct Generation {
    id: u64,
    arch: MlpArchitecture,
    members: Vec<Arc<Member>>,
}

pub struct EnsembleBank {
    settings: RwLock<BankSettings>,
    current: RwLock<Option<Arc<Generation>>>,
    live: Arc<AtomicU64>,
    fits: AtomicU64,
    seed: Option<u64>,
}

impl EnsembleBank {
    /// `seed` makes initialisation and shuffling reproducible; `None` draws
    /// from the thread RNG.
    pub fn new(settings: BankSettings, seed: Option<u64>) -> Self {
        Self {
            settings: RwLock::new(settings),
            current: RwLock::new(None),
            live: Arc::new(AtomicU64::new(0)),
            fits: AtomicU64::new(0),
            seed,
        }
    }

    pub fn settings(&self) -> BankSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change member count or layer widths. Takes effect at the next build.
    pub fn set_settings(&self, settings: BankSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Replace every member with a freshly initialised, untrained model.
    ///
    /// On error the previous generation keeps serving.
    pub fn build(&self, input_dim: usize, num_classes: usize) -> Result<u64, EnsembleError> {
        let settings = self.settings();
        let arch = MlpArchitecture::new(input_dim, settings.hidden.clone(), num_classes);
        arch.validate().map_err(EnsembleError::InvalidArchitecture)?;

        let id = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        let mut members = Vec::with_capacity(settings.num_models);
        for index in 0..settings.num_models {
            let mut rng = self.rng_for(id, index);
            let model = arch.init(&mut rng).map_err(EnsembleError::InvalidArchitecture)?;
            members.push(Arc::new(Member::new(model, MemberHealth::Untrained)));
        }
        info!(
            "Built ensemble generation {id}: {} x {input_dim}->{:?}->{num_classes}",
            members.len(),
            settings.hidden
        );
        self.swap(Some(Generation { id, arch, members }));
        Ok(id)
    }

    /// Replace the members with already trained models. They serve immediately.
    pub fn install(&self, models: Vec<MlpModel>) -> Result<u64, EnsembleError> {
        let first = models.first().ok_or(EnsembleError::EmptyInstall)?;
        let widths = layer_widths(first);
        for model in &models {
            model.validate().map_err(EnsembleError::InvalidArchitecture)?;
            if layer_widths(model) != widths {
                return Err(EnsembleError::MixedArchitectures);
            }
        }
        let arch = MlpArchitecture::new(
            first.input_dim(),
            widths[1..widths.len() - 1].to_vec(),
            first.num_classes(),
        );
        let id = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        let members = models
            .into_iter()
            .map(|model| Arc::new(Member::new(model, MemberHealth::Ready)))
            .collect::<Vec<_>>();
        info!("Installed {} pre-trained members as generation {id}", members.len());
        self.swap(Some(Generation { id, arch, members }));
        Ok(id)
    }

    /// Drop every member. In-flight fits stop without publishing.
    pub fn clear(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.swap(None);
    }

    pub fn is_built(&self) -> bool {
        self.generation().is_some()
    }

    /// True when the live generation does not match `input_dim`, `num_classes`
    /// and the current settings.
    pub fn needs_rebuild(&self, input_dim: usize, num_classes: usize) -> bool {
        let settings = self.settings();
        match self.generation() {
            Some(generation) => {
                generation.arch
                    != MlpArchitecture::new(input_dim, settings.hidden.clone(), num_classes)
                    || generation.members.len() != settings.num_models
            }
            None => true,
        }
    }

    pub fn summary(&self) -> Option<EnsembleSummary> {
        self.generation().map(|generation| EnsembleSummary {
            generation: generation.id,
            input_dim: generation.arch.input_dim,
            num_classes: generation.arch.num_classes,
            hidden: generation.arch.hidden.clone(),
            members: generation.members.iter().map(|m| m.health()).collect(),
        })
    }

    /// Start training every member concurrently on `split`.
    ///
    /// Each member continues from its current parameters with a fresh
    /// optimizer and its own shuffle order.
    pub fn fit(&self, split: Arc<Split>, options: &TrainOptions) -> Result<FitHandle, EnsembleError> {
        let generation = self.generation().ok_or(EnsembleError::NotBuilt)?;
        let options = TrainOptions {
            epochs: options.epochs.max(1),
            ..options.clone()
        };
        let run = self.fits.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel();
        let mut threads = Vec::with_capacity(generation.members.len());
        for (index, member) in generation.members.iter().enumerate() {
            let job = MemberJob {
                index,
                generation: generation.id,
                live: Arc::clone(&self.live),
                member: Arc::clone(member),
                split: Arc::clone(&split),
                options: options.clone(),
                rng: self.rng_for((run << 20) | generation.id, index),
                tx: tx.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("ensemble-member-{index}"))
                .spawn(move || job.run())
                .map_err(EnsembleError::Spawn)?;
            threads.push(handle);
        }
        info!(
            "Fitting generation {} ({} members, {} epochs, {} training rows)",
            generation.id,
            threads.len(),
            options.epochs,
            split.training_len()
        );
        Ok(FitHandle::new(generation.id, options.epochs, rx, threads))
    }

    /// Per-member class probabilities from members that have completed a fit.
    pub fn predict_all(&self, features: &[f32]) -> Result<Vec<Vec<f32>>, EnsembleError> {
        let generation = self.generation().ok_or(EnsembleError::NotTrained)?;
        let serving: Vec<Arc<MlpModel>> = generation
            .members
            .iter()
            .filter_map(|member| member.serving())
            .collect();
        if serving.is_empty() {
            return Err(EnsembleError::NotTrained);
        }
        serving
            .iter()
            .map(|model| {
                model.predict_proba(features).map_err(|err| match err {
                    ModelError::InputDim { expected, actual } => {
                        EnsembleError::InputDim { expected, actual }
                    }
                    other => EnsembleError::InvalidArchitecture(other),
                })
            })
            .collect()
    }

    fn generation(&self) -> Option<Arc<Generation>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, next: Option<Generation>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next.map(Arc::new);
    }

    fn rng_for(&self, stream: u64, index: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(
                seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
                    .wrapping_add(stream << 8)
                    .wrapping_add(index as u64),
            ),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}

fn layer_widths(model: &MlpModel) -> Vec<usize> {
    let mut widths = vec![model.input_dim()];
    widths.extend(model.layers.iter().map(|layer| layer.output_dim));
    widths
}

#[cfg(test)]
mod tests;
