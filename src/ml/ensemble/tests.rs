use super::*;
use crate::dataset::SampleId;
use crate::ml::mlp::TrainError;
use ndarray::Array2;

fn blobs(rows: usize) -> (Array2<f32>, Array2<f32>, Vec<SampleId>) {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in 0..rows {
        let jitter = (i % 4) as f32 * 0.03;
        if i % 2 == 0 {
            x.extend_from_slice(&[1.0 - jitter, 0.0, 0.2]);
            y.extend_from_slice(&[1.0, 0.0]);
        } else {
            x.extend_from_slice(&[0.0, 1.0 - jitter, 0.2]);
            y.extend_from_slice(&[0.0, 1.0]);
        }
    }
    (
        Array2::from_shape_vec((rows, 3), x).unwrap(),
        Array2::from_shape_vec((rows, 2), y).unwrap(),
        (0..rows).map(|_| SampleId::new()).collect(),
    )
}

fn split() -> Arc<Split> {
    let (training_x, training_y, training_ids) = blobs(16);
    let (validation_x, validation_y, validation_ids) = blobs(4);
    Arc::new(Split {
        training_x,
        training_y,
        validation_x,
        validation_y,
        training_ids,
        validation_ids,
    })
}

fn bank(num_models: usize) -> EnsembleBank {
    EnsembleBank::new(
        BankSettings {
            num_models,
            hidden: vec![6],
        },
        Some(11),
    )
}

fn options(epochs: usize) -> TrainOptions {
    TrainOptions {
        epochs,
        batch_size: 4,
        learning_rate: 0.05,
    }
}

fn terminal(events: &[MemberEvent], member: usize) -> &MemberStatus {
    &events
        .iter()
        .rev()
        .find(|event| event.member == member && event.status.is_terminal())
        .unwrap()
        .status
}

#[test]
fn predict_before_training_is_not_trained() {
    let bank = bank(3);
    assert!(matches!(bank.predict_all(&[0.0; 3]), Err(EnsembleError::NotTrained)));
    bank.build(3, 2).unwrap();
    assert!(matches!(bank.predict_all(&[0.0; 3]), Err(EnsembleError::NotTrained)));
    assert_eq!(bank.summary().unwrap().ready(), 0);
}

#[test]
fn failed_build_keeps_previous_generation() {
    let bank = bank(2);
    let id = bank.build(3, 2).unwrap();
    assert!(matches!(
        bank.build(3, 0),
        Err(EnsembleError::InvalidArchitecture(_))
    ));
    let summary = bank.summary().unwrap();
    assert_eq!(summary.generation, id);
    assert_eq!(summary.num_classes, 2);
}

#[test]
fn fit_trains_every_member_and_reports_epochs() {
    let bank = bank(3);
    bank.build(3, 2).unwrap();
    let handle = bank.fit(split(), &options(25)).unwrap();
    assert_eq!(handle.members(), 3);
    let events = handle.wait();

    for member in 0..3 {
        let epochs: Vec<usize> = events
            .iter()
            .filter(|event| event.member == member)
            .filter_map(|event| match event.status {
                MemberStatus::Epoch { epoch, .. } => Some(epoch),
                _ => None,
            })
            .collect();
        assert_eq!(epochs, (0..25).collect::<Vec<_>>());
        let MemberStatus::Success { metrics } = terminal(&events, member) else {
            panic!("member {member} did not succeed");
        };
        assert!(metrics.val_accuracy.is_some());
    }

    let probs = bank.predict_all(&[1.0, 0.0, 0.2]).unwrap();
    assert_eq!(probs.len(), 3);
    for member in &probs {
        assert!((member.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(member[0] > member[1]);
    }
    assert_eq!(bank.summary().unwrap().ready(), 3);
}

#[test]
fn diverging_member_is_excluded() {
    let bank = bank(3);
    let mut rng = StdRng::seed_from_u64(3);
    let arch = MlpArchitecture::new(3, vec![6], 2);
    let mut models: Vec<MlpModel> = (0..3).map(|_| arch.init(&mut rng).unwrap()).collect();
    models[1].layers[0].weights[0] = f32::NAN;
    bank.install(models).unwrap();

    let events = bank.fit(split(), &options(10)).unwrap().wait();
    assert!(matches!(
        terminal(&events, 1),
        MemberStatus::Error {
            reason: TrainError::Diverged { epoch: 0 }
        }
    ));
    assert!(matches!(terminal(&events, 0), MemberStatus::Success { .. }));
    assert!(matches!(terminal(&events, 2), MemberStatus::Success { .. }));

    let summary = bank.summary().unwrap();
    assert_eq!(summary.members[1], MemberHealth::Failed);
    assert_eq!(bank.predict_all(&[0.0, 1.0, 0.2]).unwrap().len(), 2);
}

#[test]
fn rebuild_supersedes_running_fit() {
    let bank = bank(2);
    bank.build(3, 2).unwrap();
    let handle = bank.fit(split(), &options(100_000)).unwrap();
    let old_generation = handle.generation();
    // Wait until training is underway.
    loop {
        let event = handle.events().recv().unwrap();
        if matches!(event.status, MemberStatus::Epoch { .. }) {
            break;
        }
    }
    let new_generation = bank.build(3, 2).unwrap();
    assert!(new_generation > old_generation);

    let events = handle.wait();
    for member in 0..2 {
        assert!(matches!(
            terminal(&events, member),
            MemberStatus::Error {
                reason: TrainError::Superseded
            }
        ));
    }
    assert!(matches!(bank.predict_all(&[0.0; 3]), Err(EnsembleError::NotTrained)));
}

#[test]
fn install_rejects_mixed_architectures() {
    let bank = bank(2);
    let mut rng = StdRng::seed_from_u64(1);
    let a = MlpArchitecture::new(3, vec![4], 2).init(&mut rng).unwrap();
    let b = MlpArchitecture::new(3, vec![5], 2).init(&mut rng).unwrap();
    assert!(matches!(bank.install(vec![a, b]), Err(EnsembleError::MixedArchitectures)));
    assert!(matches!(bank.install(Vec::new()), Err(EnsembleError::EmptyInstall)));
}

#[test]
fn needs_rebuild_tracks_shape_and_settings() {
    let bank = bank(2);
    assert!(bank.needs_rebuild(3, 2));
    bank.build(3, 2).unwrap();
    assert!(!bank.needs_rebuild(3, 2));
    assert!(bank.needs_rebuild(3, 4));
    bank.set_settings(BankSettings {
        num_models: 4,
        hidden: vec![6],
    });
    assert!(bank.needs_rebuild(3, 2));
    bank.clear();
    assert!(!bank.is_built());
}
