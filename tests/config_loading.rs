//! Config file loading tests

use kpi_sentinel::config::{ConfigError, PipelineConfig, WarmupPolicy};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_toml(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_file_round_trips_through_loader() {
    let file = write_toml(
        r#"
        [intake]
        capacity = 16

        [scorer]
        window_capacity = 500
        warmup_samples = 200
        retrain_interval_secs = 30
        min_retrain_samples = 20
        warmup_policy = "withhold"
        features = ["payload", "thr"]

        [model]
        n_estimators = 50
        max_samples = 128
        contamination = 0.02
        seed = 7

        [hub]
        delivery_timeout_ms = 250

        [transport]
        keepalive_secs = 15

        [simulator]
        sectors = 11
        interval_ms = 100

        [server]
        addr = "127.0.0.1:9000"
        "#,
    );

    let config = PipelineConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.intake.capacity, 16);
    assert_eq!(config.scorer.warmup_policy, WarmupPolicy::Withhold);
    assert_eq!(config.scorer.features, vec!["payload", "thr"]);
    assert_eq!(config.scorer.retrain_interval(), Duration::from_secs(30));
    assert_eq!(config.model.seed, Some(7));
    assert_eq!(config.hub.delivery_timeout(), Duration::from_millis(250));
    assert_eq!(config.transport.keepalive(), Duration::from_secs(15));
    assert_eq!(config.simulator.sectors, 11);
    assert_eq!(config.server.addr, "127.0.0.1:9000");
}

#[test]
fn test_invalid_values_rejected_by_loader() {
    let file = write_toml(
        r#"
        [scorer]
        window_capacity = 0

        [model]
        contamination = 0.75
        "#,
    );

    match PipelineConfig::load_from_file(file.path()) {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("scorer.window_capacity")));
            assert!(errors.iter().any(|e| e.contains("model.contamination")));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        PipelineConfig::load_from_file(&missing),
        Err(ConfigError::Io(_, _))
    ));
}
