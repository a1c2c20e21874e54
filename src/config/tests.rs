use super::*;
use tempfile::tempdir;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.ensemble.num_models, 5);
    assert_eq!(config.ensemble.layers, vec![64, 32]);
    assert_eq!(config.dataset.default_input_dim, 1024);
}

#[test]
fn saves_and_reloads_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
    let mut config = EngineConfig::default();
    config.ensemble.num_models = 3;
    config.ensemble.layers = vec![16];
    config.seed = Some(7);
    save_to(&config, &path).unwrap();

    let loaded = load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
fn partial_file_fills_defaults_and_clamps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "[ensemble]\nnum_models = 0\nlayers = [0, 8]\n\n[dataset]\ntrain_proportion = 1.5\n",
    )
    .unwrap();

    let loaded = load_from(&path).unwrap();
    assert_eq!(loaded.ensemble.num_models, 1);
    assert_eq!(loaded.ensemble.layers, vec![8]);
    assert_eq!(loaded.ensemble.epochs, 20);
    assert!((loaded.dataset.train_proportion - 1.0).abs() < f32::EPSILON);
}

#[test]
fn invalid_toml_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[ensemble\n").unwrap();
    let err = load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseToml { .. }));
    assert!(err.to_string().contains(CONFIG_FILE_NAME));
}

#[test]
fn loads_categories_in_both_shapes() {
    let dir = tempdir().unwrap();
    let bare = dir.path().join("bare.json");
    std::fs::write(&bare, r#"[{"id": 1, "name": "hat"}, {"id": 2, "name": "moon"}]"#).unwrap();
    let wrapped = dir.path().join("wrapped.json");
    std::fs::write(
        &wrapped,
        r#"{"title": "kiosk", "categories": [{"id": 1, "name": "hat", "desc": "a hat"}]}"#,
    )
    .unwrap();

    let bare = load_categories(&bare).unwrap();
    assert_eq!(bare.len(), 2);
    assert_eq!(bare[1].name, "moon");
    let wrapped = load_categories(&wrapped).unwrap();
    assert_eq!(wrapped[0].name, "hat");
    assert_eq!(wrapped[0].desc.as_deref(), Some("a hat"));
}
