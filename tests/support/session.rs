use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use drawlab::config::EngineConfig;
use drawlab::dataset::Category;
use drawlab::{Engine, TrainerState, TrainingStatus};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Small, seeded configuration that trains quickly.
pub fn quick_config(num_models: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.ensemble.num_models = num_models;
    config.ensemble.layers = vec![32, 16];
    config.ensemble.epochs = 20;
    config.ensemble.learning_rate = 0.01;
    config.seed = Some(1234);
    config
}

/// Like [`quick_config`] but with enough epochs that a run stays observable.
pub fn long_running_config(num_models: usize) -> EngineConfig {
    let mut config = quick_config(num_models);
    config.ensemble.epochs = 300;
    config
}

pub fn categories(names: &[&str]) -> Vec<Category> {
    names
        .iter()
        .enumerate()
        .map(|(id, name)| Category::new(id as u32, *name))
        .collect()
}

pub fn settle(engine: &Engine) {
    assert!(
        engine.wait_until_idle(IDLE_TIMEOUT),
        "training did not settle within {IDLE_TIMEOUT:?}"
    );
}

pub fn drain(statuses: &Receiver<TrainingStatus>) -> Vec<TrainingStatus> {
    statuses.try_iter().collect()
}

pub fn wait_for_state(engine: &Engine, state: TrainerState) {
    let deadline = Instant::now() + IDLE_TIMEOUT;
    while engine.state() != state {
        assert!(Instant::now() < deadline, "worker never reached {state:?}");
        thread::sleep(Duration::from_millis(1));
    }
}
