//! Kiosk simulator: draws synthetic sketches, trains the ensemble on them as
//! they arrive and reports predictions for held-out drawings.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use drawlab::config::{self, EngineConfig};
use drawlab::dataset::Category;
use drawlab::ml::metrics::{ConfusionMatrix, accuracy, precision_recall_by_class};
use drawlab::sketch::render_sketch;
use drawlab::{Engine, logging};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;

const HELD_OUT_PER_CATEGORY: usize = 4;
const TRAINING_TIMEOUT: Duration = Duration::from_secs(600);

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }

    let mut engine_config = match &options.config {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())?;
    apply_overrides(&mut engine_config, &options);

    let categories = match &options.categories {
        Some(path) => config::load_categories(path).map_err(|err| err.to_string())?,
        None => default_categories(),
    };
    if categories.is_empty() {
        return Err("Category list is empty".to_string());
    }

    let engine = Engine::with_thumbnails(engine_config).map_err(|err| err.to_string())?;
    let progress = engine.subscribe_training();
    let printer = thread::spawn(move || {
        for status in progress {
            if let Ok(line) = serde_json::to_string(&status) {
                println!("{line}");
            }
        }
    });

    engine.setup(&categories).map_err(|err| err.to_string())?;
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    for _ in 0..options.samples {
        for (kind, category) in categories.iter().enumerate() {
            let sketch = render_sketch(kind, &mut rng);
            engine
                .add_sample(&sketch, &category.name)
                .map_err(|err| err.to_string())?;
        }
    }
    if !engine.wait_until_idle(TRAINING_TIMEOUT) {
        return Err("Timed out waiting for training to finish".to_string());
    }

    let labels = engine.labels();
    let mut cm = ConfusionMatrix::new(labels.len());
    for (kind, category) in categories.iter().enumerate() {
        for _ in 0..HELD_OUT_PER_CATEGORY {
            let sketch = render_sketch(kind, &mut rng);
            let prediction = engine.predict(&sketch).map_err(|err| err.to_string())?;
            println!(
                "{}",
                json!({
                    "drawn": category.name,
                    "predicted": prediction.label,
                    "certainty": prediction.certainty,
                    "confidences": prediction.confidences,
                })
            );
            if let (Some(truth), Some(predicted)) = (
                labels.index_of(&category.name),
                prediction.label.as_deref().and_then(|label| labels.index_of(label)),
            ) {
                cm.add(truth, predicted);
            }
        }
    }

    let report = engine.training_report();
    drop(engine);
    let _ = printer.join();

    println!("training runs: {}", report.runs);
    println!("held-out accuracy: {:.3}", accuracy(&cm));
    for (idx, stats) in precision_recall_by_class(&cm).iter().enumerate() {
        println!(
            "{:<16}  precision={:.3}  recall={:.3}  support={}",
            labels.name(idx).unwrap_or("?"),
            stats.precision,
            stats.recall,
            stats.support
        );
    }
    Ok(())
}

fn default_categories() -> Vec<Category> {
    ["hat", "moon", "cheese", "mystery"]
        .iter()
        .enumerate()
        .map(|(id, name)| Category::new(id as u32, *name))
        .collect()
}

fn apply_overrides(config: &mut EngineConfig, options: &CliOptions) {
    if let Some(epochs) = options.epochs {
        config.ensemble.epochs = epochs;
    }
    if let Some(models) = options.models {
        config.ensemble.num_models = models;
    }
    if options.seed.is_some() {
        config.seed = options.seed;
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    config: Option<PathBuf>,
    categories: Option<PathBuf>,
    samples: usize,
    epochs: Option<usize>,
    models: Option<usize>,
    seed: Option<u64>,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions {
        config: None,
        categories: None,
        samples: 8,
        epochs: None,
        models: None,
        seed: None,
    };

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                options.config = Some(PathBuf::from(value));
            }
            "--categories" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--categories requires a value".to_string())?;
                options.categories = Some(PathBuf::from(value));
            }
            "--samples" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--samples requires a value".to_string())?;
                options.samples = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid --samples value: {value}"))?;
            }
            "--epochs" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--epochs requires a value".to_string())?;
                options.epochs = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid --epochs value: {value}"))?,
                );
            }
            "--models" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--models requires a value".to_string())?;
                options.models = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid --models value: {value}"))?,
                );
            }
            "--seed" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--seed requires a value".to_string())?;
                options.seed = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("Invalid --seed value: {value}"))?,
                );
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "drawlab",
        "",
        "Simulates a drawing kiosk: feeds synthetic sketches to the ensemble classifier,",
        "prints training progress as JSON lines and predictions for held-out sketches.",
        "",
        "Usage:",
        "  drawlab [options]",
        "",
        "Options:",
        "  --config <file>       Engine config TOML (default: config.toml in the app directory)",
        "  --categories <file>   Category list JSON (default: hat, moon, cheese, mystery)",
        "  --samples <n>         Sketches per category (default 8)",
        "  --epochs <n>          Override training epochs",
        "  --models <n>          Override ensemble size",
        "  --seed <n>            Seed for sketches, splits and initialization",
    ]
    .join("\n")
}
