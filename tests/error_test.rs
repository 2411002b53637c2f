//! Tests for error types

use campaign_experiments::config::EngineConfig;
use campaign_experiments::Error;

#[test]
fn test_validation_error() {
    let error = Error::Validation("confidence_level must be in (0, 100)".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Validation error"));
    assert!(error_str.contains("confidence_level"));
}

#[test]
fn test_unknown_experiment_error() {
    let error = Error::UnknownExperiment("exp-404".to_string());
    assert_eq!(format!("{error}"), "Unknown experiment: exp-404");
}

#[test]
fn test_unknown_variant_error() {
    let error = Error::UnknownVariant {
        experiment_id: "exp-1".to_string(),
        variant_id: 7,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("variant 7"));
    assert!(error_str.contains("exp-1"));
}

#[test]
fn test_evaluation_in_progress_error() {
    let error = Error::EvaluationInProgress("exp-1".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Evaluation in progress"));
    assert!(error_str.contains("Retry on the next tick"));
}

#[test]
fn test_not_ready_error() {
    let error = Error::NotReady("variant 1 has 10 samples".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Winner cannot be declared"));
    assert!(error_str.contains("10 samples"));
}

#[test]
fn test_timeout_error() {
    let error = Error::Timeout {
        experiment_id: "exp-slow".to_string(),
        millis: 250,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("exp-slow"));
    assert!(error_str.contains("250ms"));
}

#[test]
fn test_store_error() {
    let error = Error::Store("connection reset".to_string());
    assert!(format!("{error}").contains("Store error: connection reset"));
}

#[test]
fn test_serialization_error_from_serde() {
    let error = EngineConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(error, Error::Serialization(_)));
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom error".to_string());
    assert_eq!(format!("{error}"), "custom error");
}

#[test]
fn test_error_debug() {
    let error = Error::Validation("bad".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Validation"));
}

#[test]
fn test_result_type_alias() {
    fn returns_result() -> campaign_experiments::Result<u64> {
        Ok(42)
    }
    assert_eq!(returns_result().unwrap(), 42);
}
