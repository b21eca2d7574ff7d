use atlas_registration::analysis::Normalisation;
use atlas_registration::config::{load_config_or_default, Config, ConfigFormat};
use atlas_registration::transform::OrthogonalPlane;
use tempfile::TempDir;

fn custom_config() -> Config {
    let mut config = Config::default();
    config.schedule.iterations = 4;
    config.schedule.first_plane = OrthogonalPlane::ZX;
    config.schedule.include_self_pair = false;
    config.elastic.max_scale = 3;
    config.concurrency.core_budget = Some(6);
    config.projection.normalisation = Normalisation::Peak;
    config
}

#[test]
fn test_toml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("atlas.toml");
    let config = custom_config();

    config.save_to_file(&path, ConfigFormat::Toml).unwrap();
    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_json_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("atlas.json");
    let config = custom_config();

    config.save_to_file(&path, ConfigFormat::Json).unwrap();
    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[schedule]\niterations = 0\n").unwrap();

    let config = load_config_or_default(path.to_str());
    assert_eq!(config, Config::default());

    let missing = dir.path().join("missing.toml");
    assert_eq!(load_config_or_default(missing.to_str()), Config::default());
}

#[test]
fn test_elastic_intervals_follow_max_scale() {
    let mut config = Config::default();
    assert_eq!(config.elastic.intervals(), 4);
    config.elastic.max_scale = 4;
    assert_eq!(config.elastic.intervals(), 16);
}
