use std::sync::Arc;

use drawlab::dataset::{LabelSet, SampleStore, split_samples};
use drawlab::engine::{ProgressCombiner, TrainingPhase};
use drawlab::ml::ensemble::{BankSettings, EnsembleBank, MemberHealth, MemberStatus};
use drawlab::ml::mlp::{MlpArchitecture, TrainOptions};
use drawlab::ml::uncertainty::aggregate;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn corner_store() -> SampleStore {
    let store = SampleStore::new();
    for i in 0..12 {
        let jitter = (i % 3) as f32 * 0.05;
        store.add("left", vec![1.0 - jitter, 0.1, 0.0, jitter]).unwrap();
        store.add("right", vec![jitter, 0.0, 0.1, 1.0 - jitter]).unwrap();
    }
    store
}

#[test]
fn one_diverging_member_leaves_four_serving() {
    let labels = LabelSet::new(["left", "right"]);
    let store = corner_store();
    let mut rng = StdRng::seed_from_u64(21);
    let split = split_samples(&store.snapshot(), &labels, 0.75, &mut rng).unwrap();
    assert_eq!(split.training_len(), 18);
    assert_eq!(split.validation_len(), 6);

    let arch = MlpArchitecture::new(4, vec![8], 2);
    let mut models: Vec<_> = (0..5).map(|_| arch.init(&mut rng).unwrap()).collect();
    models[3].layers[1].bias[0] = f32::INFINITY;
    let bank = EnsembleBank::new(
        BankSettings {
            num_models: 5,
            hidden: vec![8],
        },
        Some(3),
    );
    bank.install(models).unwrap();

    let options = TrainOptions {
        epochs: 8,
        batch_size: 4,
        learning_rate: 0.02,
    };
    let handle = bank.fit(Arc::new(split), &options).unwrap();
    let mut combiner = ProgressCombiner::new(handle.members(), handle.epochs());
    let mut published = Vec::new();
    let mut diverged = Vec::new();
    for event in handle.wait() {
        if let MemberStatus::Error { reason } = &event.status {
            diverged.push((event.member, reason.clone()));
        }
        published.extend(combiner.record(event.member, &event.status));
    }
    assert_eq!(diverged.len(), 1);
    assert_eq!(diverged[0].0, 3);
    assert!(combiner.is_finished());
    assert_eq!(combiner.succeeded(), 4);

    let epochs: Vec<usize> = published
        .iter()
        .filter_map(|status| status.epoch)
        .collect();
    assert_eq!(epochs, (0..8).collect::<Vec<_>>());
    assert_eq!(combiner.finish().status, TrainingPhase::Success);

    let summary = bank.summary().unwrap();
    assert_eq!(summary.members[3], MemberHealth::Failed);
    assert_eq!(summary.ready(), 4);

    let probs = bank.predict_all(&[0.95, 0.1, 0.0, 0.05]).unwrap();
    assert_eq!(probs.len(), 4);
    let prediction = aggregate(&probs, &labels);
    assert_eq!(prediction.label.as_deref(), Some("left"));
    assert!(prediction.certainty >= 0.75);
}
