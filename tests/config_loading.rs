use byo_mediation::resilience::BreakerState;
use byo_mediation::{Error, MediationConfig, MediationExecutor, Source};
use std::collections::HashMap;
use std::path::PathBuf;

fn temp_file(ext: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("mediation-{}.{}", uuid::Uuid::new_v4(), ext));
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_load_yaml_file() {
    let path = temp_file(
        "yaml",
        r#"
circuit_breaker:
  failure_threshold: 5
  time_window_ms: 30000
hedge:
  enabled: false
retry:
  max_attempts: 3
"#,
    );

    let cfg = MediationConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
    assert_eq!(cfg.circuit_breaker.time_window_ms, 30_000);
    // Untouched fields keep their defaults.
    assert_eq!(cfg.circuit_breaker.recovery_time_ms, 15_000);
    assert!(!cfg.hedge.enabled);
    assert_eq!(cfg.retry.max_attempts, 3);
    assert!(cfg.selection.performance_weighting);
}

#[test]
fn test_load_json_file() {
    let path = temp_file(
        "json",
        r#"{"selection": {"seed": 42}, "record_aborted_attempts": true}"#,
    );

    let cfg = MediationConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(cfg.selection.seed, Some(42));
    assert!(cfg.record_aborted_attempts);
}

#[test]
fn test_invalid_file_is_configuration_error() {
    let path = temp_file("yaml", "circuit_breaker:\n  failure_threshold: 0\n");

    let err = MediationConfig::from_file(&path).unwrap_err();
    std::fs::remove_file(&path).ok();

    assert!(matches!(err, Error::Configuration { .. }));
    assert!(err.to_string().contains("failure_threshold"));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = MediationConfig::from_file("/nonexistent/mediation.yaml").unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_overrides_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("MEDIATION_BREAKER_FAILURE_THRESHOLD", "2"),
        ("MEDIATION_HEDGING_ENABLED", "off"),
        ("MEDIATION_SELECTION_SEED", "not-a-number"),
    ]
    .into_iter()
    .collect();

    let cfg = MediationConfig::default()
        .with_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

    assert_eq!(cfg.circuit_breaker.failure_threshold, 2);
    assert!(!cfg.hedge.enabled);
    assert_eq!(cfg.selection.seed, None);
}

#[tokio::test]
async fn test_executor_honours_loaded_threshold() {
    let cfg = MediationConfig::from_yaml_str(
        "circuit_breaker:\n  failure_threshold: 1\nretry:\n  max_attempts: 1\n",
    )
    .unwrap();
    let ex = MediationExecutor::builder().config(cfg).build().unwrap();
    let source = Source::builder("flaky").build().unwrap();
    let loader = byo_mediation::loader_fn(|_s: Source, _c| async move {
        Err::<byo_mediation::LoadedAd, _>(byo_mediation::LoadError::Status(500))
    });

    ex.execute(std::slice::from_ref(&source), &loader, None).await;

    let snap = ex.breaker_snapshot(&source, byo_mediation::executor::DEFAULT_PLACEMENT);
    assert_eq!(snap.state, BreakerState::Open);
}
