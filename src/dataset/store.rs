//! In-memory store of labeled feature vectors with change notification.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, mpsc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier assigned to a stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId(Uuid);

impl SampleId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A labeled feature vector. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    id: SampleId,
    label: String,
    features: Vec<f32>,
}

impl Sample {
    pub fn id(&self) -> SampleId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn features(&self) -> &[f32] {
        &self.features
    }
}

/// Errors returned by mutating store calls. Nothing is committed on error.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Sample label must not be empty")]
    InvalidLabel,
    #[error("Sample feature vector is empty")]
    EmptyFeatures,
    #[error("Sample feature vector contains non-finite values")]
    NonFiniteFeatures,
    #[error("Feature vector has {actual} values but the store holds {expected}-dimensional samples")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// What a committed mutation changed.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// A single sample was added.
    Created { id: SampleId, label: String },
    /// Every sample was removed.
    Cleared { removed: usize },
}

/// Change notification emitted once per committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    /// Monotonic revision of the store after the mutation.
    pub revision: u64,
    pub change: StoreChange,
    /// Number of samples held after the mutation.
    pub total: usize,
}

/// Immutable view of the store at one revision.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub dim: Option<usize>,
    samples: HashMap<SampleId, Arc<Sample>>,
    by_label: HashMap<String, Vec<SampleId>>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, id: &SampleId) -> Option<&Arc<Sample>> {
        self.samples.get(id)
    }

    /// Ids stored under `label`, in insertion order.
    pub fn ids_for_label(&self, label: &str) -> &[SampleId] {
        self.by_label.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn samples(&self) -> impl Iterator<Item = &Arc<Sample>> {
        self.samples.values()
    }
}

type Observer = Box<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
struct StoreInner {
    revision: u64,
    dim: Option<usize>,
    samples: HashMap<SampleId, Arc<Sample>>,
    by_label: HashMap<String, Vec<SampleId>>,
}

/// Thread-safe sample store.
///
/// Mutations are serialized and each one notifies every observer after it is
/// committed and before the next mutation can start, so observers see events in
/// commit order and may read the store from inside the callback.
#[derive(Default)]
pub struct SampleStore {
    inner: RwLock<StoreInner>,
    observers: RwLock<Vec<Observer>>,
    commit: Mutex<()>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a labeled feature vector and return its id.
    pub fn add(&self, label: &str, features: Vec<f32>) -> Result<SampleId, StoreError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(StoreError::InvalidLabel);
        }
        if features.is_empty() {
            return Err(StoreError::EmptyFeatures);
        }
        if features.iter().any(|value| !value.is_finite()) {
            return Err(StoreError::NonFiniteFeatures);
        }
        self.mutate(|inner| {
            if let Some(expected) = inner.dim
                && expected != features.len()
            {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: features.len(),
                });
            }
            let id = SampleId::new();
            inner.dim = Some(features.len());
            inner.samples.insert(
                id,
                Arc::new(Sample {
                    id,
                    label: label.to_string(),
                    features,
                }),
            );
            inner.by_label.entry(label.to_string()).or_default().push(id);
            Ok((
                id,
                StoreChange::Created {
                    id,
                    label: label.to_string(),
                },
            ))
        })
    }

    /// Remove every sample. Always emits a `Cleared` event, even on an empty store.
    pub fn clear(&self) {
        let result = self.mutate(|inner| {
            let removed = inner.samples.len();
            inner.samples.clear();
            inner.by_label.clear();
            inner.dim = None;
            Ok(((), StoreChange::Cleared { removed }))
        });
        debug_assert!(result.is_ok());
    }

    pub fn all(&self) -> Vec<Arc<Sample>> {
        self.read().samples.values().cloned().collect()
    }

    pub fn count_by_label(&self, label: &str) -> usize {
        self.read().by_label.get(label).map(Vec::len).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.read().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature dimension shared by every stored sample, if any are stored.
    pub fn dim(&self) -> Option<usize> {
        self.read().dim
    }

    /// Labels that currently hold at least one sample, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.read().by_label.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.read();
        StoreSnapshot {
            revision: inner.revision,
            dim: inner.dim,
            samples: inner.samples.clone(),
            by_label: inner.by_label.clone(),
        }
    }

    /// Register a callback invoked after every committed mutation.
    ///
    /// Callbacks run on the mutating thread and must not mutate the store.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Channel flavour of [`SampleStore::subscribe`].
    pub fn subscribe_channel(&self) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut StoreInner) -> Result<(R, StoreChange), StoreError>,
    ) -> Result<R, StoreError> {
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, event) = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let (result, change) = apply(&mut inner)?;
            inner.revision += 1;
            let event = StoreEvent {
                revision: inner.revision,
                change,
                total: inner.samples.len(),
            };
            (result, event)
        };
        let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter() {
            observer(&event);
        }
        Ok(result)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("SampleStore")
            .field("revision", &inner.revision)
            .field("samples", &inner.samples.len())
            .field("labels", &inner.by_label.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn add_groups_by_label_and_counts() {
        let store = SampleStore::new();
        let a = store.add("hat", vec![1.0, 0.0]).unwrap();
        store.add("hat", vec![0.9, 0.1]).unwrap();
        store.add("moon", vec![0.0, 1.0]).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.count_by_label("hat"), 2);
        assert_eq!(store.count_by_label("cheese"), 0);
        assert_eq!(store.labels(), vec!["hat".to_string(), "moon".to_string()]);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.get(&a).unwrap().label(), "hat");
        for id in snapshot.ids_for_label("hat") {
            assert_eq!(snapshot.get(id).unwrap().label(), "hat");
        }
    }

    #[test]
    fn rejects_blank_label_without_committing() {
        let store = SampleStore::new();
        let events = store.subscribe_channel();
        assert_eq!(store.add("  ", vec![1.0]), Err(StoreError::InvalidLabel));
        assert!(store.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn rejects_mismatched_dimension_and_bad_values() {
        let store = SampleStore::new();
        store.add("hat", vec![1.0, 2.0]).unwrap();
        assert_eq!(
            store.add("hat", vec![1.0]),
            Err(StoreError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(store.add("hat", vec![]), Err(StoreError::EmptyFeatures));
        assert_eq!(
            store.add("hat", vec![f32::NAN, 1.0]),
            Err(StoreError::NonFiniteFeatures)
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn emits_one_event_per_mutation_in_commit_order() {
        let store = SampleStore::new();
        let events = store.subscribe_channel();
        store.add("hat", vec![1.0]).unwrap();
        store.add("moon", vec![2.0]).unwrap();
        store.clear();

        let received: Vec<StoreEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert_eq!(
            received.iter().map(|e| e.revision).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(matches!(received[1].change, StoreChange::Created { ref label, .. } if label == "moon"));
        assert_eq!(received[2].change, StoreChange::Cleared { removed: 2 });
        assert_eq!(received[2].total, 0);
        assert_eq!(store.dim(), None);
    }

    #[test]
    fn observers_see_committed_state() {
        let store = Arc::new(SampleStore::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let observer_store = Arc::downgrade(&store);
        let observer_seen = Arc::clone(&seen);
        store.subscribe(move |event| {
            if let Some(store) = observer_store.upgrade() {
                assert_eq!(store.len(), event.total);
                assert_eq!(store.snapshot().revision, event.revision);
                observer_seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        store.add("hat", vec![1.0]).unwrap();
        store.add("hat", vec![1.5]).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
