mod support;

use drawlab::engine::{TrainingPhase, TrainingStatus};
use drawlab::sketch::render_sketch;
use drawlab::config::EngineConfig;
use drawlab::{Engine, EngineError, Feedback, TrainerState};
use rand::SeedableRng;
use rand::rngs::StdRng;
use support::session::{
    categories, drain, long_running_config, quick_config, settle, wait_for_state,
};

const HAT: usize = 0;
const MOON: usize = 1;

fn kiosk_labels() -> Vec<drawlab::dataset::Category> {
    categories(&["hat", "moon", "cheese", "mystery"])
}

/// Engine trained on ten near-identical hats.
fn hat_engine() -> Engine {
    hat_engine_with(quick_config(5))
}

fn hat_engine_with(config: EngineConfig) -> Engine {
    let engine = Engine::with_thumbnails(config).unwrap();
    engine.setup(&kiosk_labels()).unwrap();
    for i in 0..10 {
        let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(i % 2));
        engine.add_sample(&sketch, "hat").unwrap();
    }
    settle(&engine);
    engine
}

#[test]
fn predict_before_training_is_untrained() {
    let engine = Engine::with_thumbnails(quick_config(3)).unwrap();
    let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(1));

    let before_setup = engine.predict(&sketch).unwrap();
    assert!(before_setup.is_untrained());
    assert_eq!(before_setup.certainty, 0.0);

    engine.setup(&kiosk_labels()).unwrap();
    settle(&engine);
    let prediction = engine.predict(&sketch).unwrap();
    assert_eq!(prediction.label, None);
    assert_eq!(prediction.certainty, 0.0);
    assert_eq!(prediction.confidences.len(), 4);
    assert!(prediction.confidences.values().all(|&c| c == 0.0));
    assert_eq!(prediction.best(), None);

    // Build-only run: architecture exists at the default input width.
    let summary = engine.ensemble_summary().unwrap();
    assert_eq!(summary.input_dim, 1024);
    assert_eq!(summary.num_classes, 4);
    assert_eq!(summary.ready(), 0);
}

#[test]
fn repeated_hats_are_predicted_with_consensus() {
    let engine = hat_engine();
    let report = engine.training_report();
    assert_eq!(report.state, TrainerState::Idle);
    assert_eq!(report.last_outcome, Some(TrainerState::Succeeded));
    assert_eq!(report.last_sample_count, 10);

    let prediction = engine
        .predict(&render_sketch(HAT, &mut StdRng::seed_from_u64(0)))
        .unwrap();
    assert_eq!(prediction.label.as_deref(), Some("hat"));
    assert!(prediction.certainty >= 0.8, "certainty {}", prediction.certainty);
    let total: f32 = prediction.confidences.values().sum();
    assert!((total - 1.0).abs() < 1e-4);
}

#[test]
fn repeated_setup_keeps_the_trained_ensemble() {
    let engine = hat_engine();
    let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(0));
    let generation = engine.ensemble_summary().unwrap().generation;
    let before = engine.predict(&sketch).unwrap();

    assert!(!engine.setup(&kiosk_labels()).unwrap());
    settle(&engine);
    assert_eq!(engine.ensemble_summary().unwrap().generation, generation);
    assert_eq!(engine.labels().index_of("cheese"), Some(2));
    assert_eq!(engine.predict(&sketch).unwrap(), before);

    let mut wider = kiosk_labels();
    wider.push(drawlab::dataset::Category::new(4, "rocket"));
    assert!(engine.setup(&wider).unwrap());
    settle(&engine);
    let summary = engine.ensemble_summary().unwrap();
    assert_eq!(summary.num_classes, 5);
    assert!(summary.generation > generation);
    let prediction = engine.predict(&sketch).unwrap();
    assert_eq!(prediction.confidences.len(), 5);
    assert_eq!(prediction.label.as_deref(), Some("hat"));
}

#[test]
fn reordered_labels_replace_the_trained_ensemble() {
    let engine = hat_engine_with(long_running_config(3));
    let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(0));
    let generation = engine.ensemble_summary().unwrap().generation;
    assert_eq!(engine.predict(&sketch).unwrap().label.as_deref(), Some("hat"));

    assert!(engine.setup(&categories(&["moon", "hat", "cheese", "mystery"])).unwrap());
    let summary = engine.ensemble_summary().unwrap();
    assert!(summary.generation > generation);
    assert_eq!(summary.ready(), 0);
    assert!(engine.predict(&sketch).unwrap().is_untrained());

    settle(&engine);
    assert_eq!(engine.labels().index_of("hat"), Some(1));
    let prediction = engine.predict(&sketch).unwrap();
    assert_eq!(prediction.label.as_deref(), Some("hat"));
}

#[test]
fn triggers_during_a_run_collapse_into_one_follow_up() {
    let engine = hat_engine_with(long_running_config(3));
    let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(0));
    let runs = engine.training_report().runs;

    engine.retrain();
    wait_for_state(&engine, TrainerState::Training);
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..5 {
        engine.add_sample(&render_sketch(HAT, &mut rng), "hat").unwrap();
    }
    // Predictions read the ensemble directly while the fit is running.
    let prediction = engine.predict(&sketch).unwrap();
    assert_eq!(engine.state(), TrainerState::Training);
    assert_eq!(prediction.label.as_deref(), Some("hat"));

    settle(&engine);
    let report = engine.training_report();
    assert_eq!(report.runs, runs + 2);
    assert_eq!(report.last_sample_count, 15);
    assert_eq!(report.last_outcome, Some(TrainerState::Succeeded));
}

#[test]
fn progress_stream_reports_every_epoch_of_the_final_run() {
    let engine = Engine::with_thumbnails(quick_config(3)).unwrap();
    let statuses = engine.subscribe_training();
    engine.setup(&kiosk_labels()[..2]).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..4 {
        engine.add_sample(&render_sketch(HAT, &mut rng), "hat").unwrap();
        engine.add_sample(&render_sketch(MOON, &mut rng), "moon").unwrap();
    }
    settle(&engine);

    let statuses = drain(&statuses);
    let last_start = statuses
        .iter()
        .rposition(|status| status.status == TrainingPhase::Start)
        .unwrap();
    let run: &[TrainingStatus] = &statuses[last_start..];
    let epochs: Vec<usize> = run.iter().filter_map(|status| status.epoch).collect();
    assert_eq!(epochs, (0..20).collect::<Vec<_>>());
    let done = run.last().unwrap();
    assert_eq!(done.status, TrainingPhase::Success);
    assert_eq!(done.epochs, 20);
    let data = done.data.unwrap();
    assert!(data.loss.is_finite());
    assert!(data.val_loss.is_some());

    let json = serde_json::to_value(&run[1]).unwrap();
    assert_eq!(json["status"], "epoch");
    assert!(json["data"]["accuracyVal"].is_number());
}

#[test]
fn single_label_reports_an_error() {
    let engine = Engine::with_thumbnails(quick_config(2)).unwrap();
    let statuses = engine.subscribe_training();
    engine.setup(&kiosk_labels()[..1]).unwrap();
    settle(&engine);

    let statuses = drain(&statuses);
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].status, TrainingPhase::Start);
    assert_eq!(statuses[1].status, TrainingPhase::Error);
    assert!(statuses[1].error.as_deref().unwrap().contains("at least 2 classes"));
    assert_eq!(
        engine.training_report().last_outcome,
        Some(TrainerState::Failed)
    );
}

#[test]
fn reset_returns_to_untrained() {
    let engine = hat_engine();
    engine.reset();
    settle(&engine);
    assert_eq!(engine.sample_count(), 0);
    let prediction = engine
        .predict(&render_sketch(HAT, &mut StdRng::seed_from_u64(0)))
        .unwrap();
    assert!(prediction.is_untrained());
    assert_eq!(engine.ensemble_summary().unwrap().ready(), 0);
}

#[test]
fn feedback_is_folded_back_into_the_store() {
    let engine = hat_engine();
    let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(0));

    let confirmed = engine.submit_feedback(&sketch, Feedback::Correct).unwrap();
    assert!(confirmed.correct);
    assert_eq!(confirmed.label, "hat");
    assert!(confirmed.confidence > 0.0);
    assert_eq!(engine.count_by_label("hat"), 11);

    let corrected = engine
        .submit_feedback(
            &sketch,
            Feedback::Incorrect {
                label: "mystery".to_string(),
            },
        )
        .unwrap();
    assert!(!corrected.correct);
    assert_eq!(corrected.label, "mystery");
    assert_eq!(engine.count_by_label("mystery"), 1);

    let unknown = engine.submit_feedback(
        &sketch,
        Feedback::Incorrect {
            label: "submarine".to_string(),
        },
    );
    assert!(matches!(unknown, Err(EngineError::InvalidLabel { .. })));
    settle(&engine);
}

#[test]
fn confirming_without_a_prediction_fails() {
    let engine = Engine::with_thumbnails(quick_config(2)).unwrap();
    engine.setup(&kiosk_labels()).unwrap();
    settle(&engine);
    let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(0));
    assert!(matches!(
        engine.submit_feedback(&sketch, Feedback::Correct),
        Err(EngineError::NothingToConfirm)
    ));
    assert_eq!(engine.sample_count(), 0);
}

#[test]
fn blank_label_is_rejected() {
    let engine = Engine::with_thumbnails(quick_config(2)).unwrap();
    let sketch = render_sketch(HAT, &mut StdRng::seed_from_u64(0));
    assert!(matches!(
        engine.add_sample(&sketch, "   "),
        Err(EngineError::InvalidLabel { .. })
    ));
    assert_eq!(engine.sample_count(), 0);
}
