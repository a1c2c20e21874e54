//! The sketch classifier session: store, ensemble and training worker.

mod embed;
mod errors;
mod orchestrator;
mod progress;

pub use embed::{ExtractError, FeatureExtractor, ThumbnailEmbedder};
pub use errors::EngineError;
pub use orchestrator::{TrainerState, TrainingReport};
pub use progress::{ProgressCombiner, TrainingPhase, TrainingStatus, mean_metrics};

use std::sync::mpsc::Receiver;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::dataset::{Category, LabelSet, SampleId, SampleStore, StoreError};
use crate::ml::ensemble::{EnsembleBank, EnsembleError, EnsembleSummary};
use crate::ml::uncertainty::{PredictionResult, aggregate};
use orchestrator::{Orchestrator, TrainingContext, Trigger};

/// A user's verdict on the prediction for a drawing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Feedback {
    /// The predicted label was right.
    Correct,
    /// The prediction was wrong; `label` is what the drawing shows.
    Incorrect { label: String },
}

/// Outcome of [`Engine::submit_feedback`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackMatch {
    pub label: String,
    pub correct: bool,
    /// Ensemble confidence for `label` at the time of the verdict.
    pub confidence: f32,
    pub sample: SampleId,
}

/// One classifier session.
///
/// Adding a sample starts a background training run; triggers that arrive
/// while a run is active collapse into one follow-up run. Predictions read the
/// ensemble directly and never wait for training.
pub struct Engine {
    config: EngineConfig,
    extractor: Box<dyn FeatureExtractor>,
    store: Arc<SampleStore>,
    bank: Arc<EnsembleBank>,
    labels: Arc<RwLock<LabelSet>>,
    orchestrator: Orchestrator,
}

impl Engine {
    pub fn new<E>(config: EngineConfig, extractor: E) -> Result<Self, EngineError>
    where
        E: FeatureExtractor + 'static,
    {
        let config = config.normalized();
        let store = Arc::new(SampleStore::new());
        let bank = Arc::new(EnsembleBank::new(
            config.ensemble.bank_settings(),
            config.seed,
        ));
        let labels = Arc::new(RwLock::new(LabelSet::default()));
        let orchestrator = Orchestrator::spawn(TrainingContext {
            store: Arc::clone(&store),
            bank: Arc::clone(&bank),
            labels: Arc::clone(&labels),
            config: config.clone(),
        })
        .map_err(EngineError::Worker)?;

        let trigger = orchestrator.trigger_sender();
        store.subscribe(move |event| trigger.send(Trigger::from(event)));

        Ok(Self {
            config,
            extractor: Box::new(extractor),
            store,
            bank,
            labels,
            orchestrator,
        })
    }

    /// Engine backed by the built-in [`ThumbnailEmbedder`].
    pub fn with_thumbnails(config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(config, ThumbnailEmbedder::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn labels(&self) -> LabelSet {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install the category list. Returns `false` when it matches the current
    /// one, in which case the trained ensemble is kept.
    ///
    /// A different list, even one that only reorders or renames labels,
    /// replaces the ensemble with untrained members before the retrain starts.
    pub fn setup(&self, categories: &[Category]) -> Result<bool, EngineError> {
        let next = LabelSet::from_categories(categories);
        {
            let mut labels = self.labels.write().unwrap_or_else(PoisonError::into_inner);
            if *labels == next {
                debug!("Category list unchanged ({} labels)", next.len());
                return Ok(false);
            }
            info!("Categories set to {:?}", next.names());
            let dim = self
                .store
                .dim()
                .unwrap_or(self.config.dataset.default_input_dim);
            if let Err(err) = self.bank.build(dim, next.len()) {
                debug!("No ensemble for {} labels: {err}", next.len());
                self.bank.clear();
            }
            *labels = next;
        }
        self.orchestrator.trigger(Trigger::Retrain);
        Ok(true)
    }

    /// Embed `image` and store it under `label`.
    pub fn add_sample(&self, image: &RgbaImage, label: &str) -> Result<SampleId, EngineError> {
        let features = self.extractor.embed(image)?;
        self.add_features(label, features)
    }

    /// Store an already embedded sample.
    pub fn add_features(&self, label: &str, features: Vec<f32>) -> Result<SampleId, EngineError> {
        self.store.add(label, features).map_err(|err| match err {
            StoreError::InvalidLabel => EngineError::InvalidLabel {
                label: label.to_string(),
            },
            other => other.into(),
        })
    }

    pub fn predict(&self, image: &RgbaImage) -> Result<PredictionResult, EngineError> {
        let features = self.extractor.embed(image)?;
        self.predict_features(&features)
    }

    /// Aggregate prediction for an embedding. Untrained (no label, zero
    /// certainty) until some member has finished a fit.
    pub fn predict_features(&self, features: &[f32]) -> Result<PredictionResult, EngineError> {
        let labels = self.labels();
        let probs = match self.bank.predict_all(features) {
            Ok(probs) => probs,
            Err(EnsembleError::NotTrained) => return Ok(PredictionResult::untrained(&labels)),
            Err(err) => return Err(err.into()),
        };
        // A label change is pending a rebuild; the members speak another vocabulary.
        if probs.first().is_some_and(|member| member.len() != labels.len()) {
            return Ok(PredictionResult::untrained(&labels));
        }
        Ok(aggregate(&probs, &labels))
    }

    /// Record a verdict on the current prediction for `image` and keep the
    /// drawing as a new sample under the confirmed or corrected label.
    pub fn submit_feedback(
        &self,
        image: &RgbaImage,
        feedback: Feedback,
    ) -> Result<FeedbackMatch, EngineError> {
        let features = self.extractor.embed(image)?;
        let prediction = self.predict_features(&features)?;
        let (label, correct) = match feedback {
            Feedback::Correct => {
                let (label, _) = prediction.best().ok_or(EngineError::NothingToConfirm)?;
                (label.to_string(), true)
            }
            Feedback::Incorrect { label } => {
                if self.labels().index_of(label.trim()).is_none() {
                    return Err(EngineError::InvalidLabel { label });
                }
                (label.trim().to_string(), false)
            }
        };
        let confidence = prediction.confidence(&label);
        let sample = self.add_features(&label, features)?;
        info!("Feedback on {label:?}: correct={correct}, confidence {confidence:.3}");
        Ok(FeedbackMatch {
            label,
            correct,
            confidence,
            sample,
        })
    }

    /// Drop every stored sample; the ensemble is re-initialized untrained.
    pub fn reset(&self) {
        self.store.clear();
    }

    pub fn retrain(&self) {
        self.orchestrator.trigger(Trigger::Retrain);
    }

    /// Receive every ensemble-wide training status published from now on.
    pub fn subscribe_training(&self) -> Receiver<TrainingStatus> {
        self.orchestrator.subscribe()
    }

    pub fn state(&self) -> TrainerState {
        self.orchestrator.report().state
    }

    pub fn training_report(&self) -> TrainingReport {
        self.orchestrator.report()
    }

    /// Block until no training run is active or queued. `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.orchestrator.wait_idle(timeout)
    }

    pub fn sample_count(&self) -> usize {
        self.store.len()
    }

    pub fn count_by_label(&self, label: &str) -> usize {
        self.store.count_by_label(label)
    }

    pub fn ensemble_summary(&self) -> Option<EnsembleSummary> {
        self.bank.summary()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Superseding the live generation stops member threads at their next epoch.
        self.bank.clear();
        self.orchestrator.shutdown();
    }
}
