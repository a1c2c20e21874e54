use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::ml::mlp::{MlpModel, TrainError};

/// Whether a member may serve predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberHealth {
    /// Built but no fit has completed yet.
    Untrained,
    /// Completed a fit (or was installed pre-trained); serves predictions.
    Ready,
    /// The latest fit failed; excluded until a later fit succeeds.
    Failed,
}

struct MemberState {
    model: Arc<MlpModel>,
    health: MemberHealth,
}

/// One ensemble member's parameter slot.
///
/// Readers clone the current `Arc<MlpModel>` and release the lock before
/// computing; trainers work on a private copy and swap it in per epoch.
pub(crate) struct Member {
    state: RwLock<MemberState>,
}

impl Member {
    pub(crate) fn new(model: MlpModel, health: MemberHealth) -> Self {
        Self {
            state: RwLock::new(MemberState {
                model: Arc::new(model),
                health,
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<MlpModel> {
        Arc::clone(&self.read().model)
    }

    /// Current model if the member serves predictions.
    pub(crate) fn serving(&self) -> Option<Arc<MlpModel>> {
        let state = self.read();
        (state.health == MemberHealth::Ready).then(|| Arc::clone(&state.model))
    }

    pub(crate) fn health(&self) -> MemberHealth {
        self.read().health
    }

    /// Swap in freshly trained parameters unless `generation` was superseded.
    pub(crate) fn publish(
        &self,
        generation: u64,
        live: &AtomicU64,
        model: MlpModel,
    ) -> Result<(), TrainError> {
        let model = Arc::new(model);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if live.load(Ordering::SeqCst) != generation {
            return Err(TrainError::Superseded);
        }
        state.model = model;
        Ok(())
    }

    pub(crate) fn set_health(&self, health: MemberHealth) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .health = health;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemberState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}
