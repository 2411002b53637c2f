//! Service flows: evaluation, manual declaration and idempotency

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use campaign_experiments::backend::MemoryExperimentStore;
use campaign_experiments::clock::{Clock, ManualClock};
use campaign_experiments::config::{EngineConfig, TestConfig, WinnerMetric};
use campaign_experiments::experiment::{
    DeclaredBy, Experiment, ExperimentState, MetricSnapshot, RawCounters, Variant,
};
use campaign_experiments::lock::EvaluationLock;
use campaign_experiments::service::ExperimentService;
use campaign_experiments::stats::TestType;
use campaign_experiments::Error;

const EXP: &str = "exp-subject";

fn test_config(auto_select_winner: bool) -> TestConfig {
    TestConfig {
        winner_metric: WinnerMetric::ConversionRate,
        confidence_level: 95.0,
        minimum_sample_size: 100,
        auto_select_winner,
    }
}

fn conversions(converted: u64, sent: u64) -> RawCounters {
    RawCounters {
        sent,
        delivered: sent,
        opened: sent / 2,
        converted,
        ..RawCounters::default()
    }
}

fn setup(auto_select_winner: bool) -> (Arc<MemoryExperimentStore>, ExperimentService<MemoryExperimentStore>) {
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let store = Arc::new(MemoryExperimentStore::new());
    store.add_experiment(
        Experiment::builder(EXP, "Spring sale subject line")
            .variant(Variant::new(1, "Control", 50.0))
            .variant(Variant::new(2, "Urgency", 50.0))
            .config(test_config(auto_select_winner))
            .created_at(start)
            .build(),
    );
    store.start_experiment(EXP, start).unwrap();

    let service = ExperimentService::new(Arc::clone(&store), EngineConfig::default())
        .with_clock(Arc::new(ManualClock::new(start + Duration::hours(1))));
    (store, service)
}

fn record(store: &MemoryExperimentStore, a: RawCounters, b: RawCounters) {
    store.record_snapshot(EXP, MetricSnapshot::new(1, a)).unwrap();
    store.record_snapshot(EXP, MetricSnapshot::new(2, b)).unwrap();
}

#[tokio::test]
async fn test_significant_result_declares_winner_automatically() {
    let (store, service) = setup(true);
    record(&store, conversions(150, 1000), conversions(250, 1000));

    let result = service.evaluate_experiment(EXP).await.unwrap();
    assert_eq!(result.test_type(), TestType::ZTest);
    assert!(result.is_significant());
    assert_eq!(result.winner_variant_id(), Some(2));
    assert!(result.summary_text().contains("variant 2 wins"));

    assert_eq!(store.state(EXP), Some(ExperimentState::WinnerDeclared));
    let latest = service.latest_result(EXP).await.unwrap().unwrap();
    assert_eq!(latest, result);
}

#[tokio::test]
async fn test_repeat_evaluation_after_declaration_is_identical() {
    let (store, service) = setup(true);
    record(&store, conversions(150, 1000), conversions(250, 1000));

    let first = service.evaluate_at(EXP, Utc::now()).await.unwrap();
    assert!(first.newly_declared);
    assert_eq!(first.state, ExperimentState::WinnerDeclared);

    // New data after the decision changes nothing.
    record(&store, conversions(400, 2000), conversions(300, 2000));
    let second = service.evaluate_at(EXP, Utc::now()).await.unwrap();
    assert!(!second.newly_declared);
    assert_eq!(second.result, first.result);
    assert_eq!(second.decision, first.decision);
    assert_eq!(store.results(EXP).len(), 1);
}

#[tokio::test]
async fn test_below_minimum_sample_stays_running() {
    let (store, service) = setup(true);
    // Large gap, but only 50 sends per variant against a minimum of 100.
    record(&store, conversions(5, 50), conversions(30, 50));

    let evaluation = service.evaluate_at(EXP, Utc::now()).await.unwrap();
    assert_eq!(evaluation.state, ExperimentState::Running);
    assert_eq!(evaluation.decision, None);
    assert!(!evaluation.newly_declared);
    assert_eq!(store.state(EXP), Some(ExperimentState::Running));
    assert_eq!(store.results(EXP).len(), 1);
}

#[tokio::test]
async fn test_auto_select_disabled_records_without_declaring() {
    let (store, service) = setup(false);
    record(&store, conversions(150, 1000), conversions(250, 1000));

    let evaluation = service.evaluate_at(EXP, Utc::now()).await.unwrap();
    assert_eq!(evaluation.result.winner_variant_id(), Some(2));
    assert_eq!(evaluation.decision, None);
    assert_eq!(store.state(EXP), Some(ExperimentState::Running));
}

#[tokio::test]
async fn test_forced_declaration_before_threshold_is_terminal() {
    let (store, service) = setup(false);
    record(&store, conversions(5, 50), conversions(6, 50));

    let decision = service.declare_winner(EXP, 1, true).await.unwrap();
    assert_eq!(decision.winner_variant_id(), 1);
    assert_eq!(decision.declared_by(), DeclaredBy::Manual);
    assert!(decision.forced());
    assert_eq!(store.state(EXP), Some(ExperimentState::WinnerDeclared));

    let first = service.evaluate_experiment(EXP).await.unwrap();
    let second = service.evaluate_experiment(EXP).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.results(EXP).len(), 1);

    // A different variant cannot replace the decision.
    let again = service.declare_winner(EXP, 2, true).await.unwrap();
    assert_eq!(again, decision);
}

#[tokio::test]
async fn test_unforced_declaration_needs_supporting_analysis() {
    let (store, service) = setup(false);

    assert!(matches!(
        service.declare_winner(EXP, 2, false).await,
        Err(Error::NotReady(_))
    ));

    record(&store, conversions(150, 1000), conversions(250, 1000));
    service.evaluate_experiment(EXP).await.unwrap();

    assert!(matches!(
        service.declare_winner(EXP, 1, false).await,
        Err(Error::NotReady(_))
    ));
    let decision = service.declare_winner(EXP, 2, false).await.unwrap();
    assert!(!decision.forced());
    assert!(decision.p_value().unwrap() < 0.05);
}

#[tokio::test]
async fn test_declaring_unknown_variant_fails() {
    let (_store, service) = setup(false);
    assert!(matches!(
        service.declare_winner(EXP, 9, true).await,
        Err(Error::UnknownVariant { variant_id: 9, .. })
    ));
}

#[tokio::test]
async fn test_evaluation_rejected_while_lease_held() {
    let (store, service) = setup(true);
    record(&store, conversions(150, 1000), conversions(250, 1000));

    let now = service.clock().now();
    let token = store
        .try_acquire(EXP, now, Duration::seconds(60))
        .unwrap()
        .unwrap();

    assert!(matches!(
        service.evaluate_at(EXP, now).await,
        Err(Error::EvaluationInProgress(_))
    ));
    assert!(matches!(
        service.declare_winner(EXP, 2, true).await,
        Err(Error::EvaluationInProgress(_))
    ));
    assert!(store.results(EXP).is_empty());

    store.release(EXP, token).unwrap();
    assert!(service.evaluate_at(EXP, now).await.is_ok());
    assert!(!store.is_evaluation_in_progress(EXP));
}

#[tokio::test]
async fn test_expired_lease_does_not_block_forever() {
    let (store, service) = setup(true);
    record(&store, conversions(150, 1000), conversions(250, 1000));

    let now = service.clock().now();
    store
        .try_acquire(EXP, now - Duration::minutes(10), Duration::seconds(60))
        .unwrap()
        .unwrap();
    assert!(service.evaluate_at(EXP, now).await.is_ok());
}

#[tokio::test]
async fn test_draft_and_unknown_experiments_rejected() {
    let (store, service) = setup(true);
    store.add_experiment(Experiment::new("exp-draft", "Not started"));

    assert!(matches!(
        service.evaluate_experiment("exp-draft").await,
        Err(Error::Validation(_))
    ));
    assert_eq!(store.state("exp-draft"), Some(ExperimentState::Draft));
    assert!(!store.is_evaluation_in_progress("exp-draft"));

    assert!(matches!(
        service.evaluate_experiment("exp-missing").await,
        Err(Error::UnknownExperiment(_))
    ));
}

#[tokio::test]
async fn test_missing_counters_flag_low_confidence() {
    let (store, service) = setup(true);
    store
        .record_snapshot(EXP, MetricSnapshot::new(1, conversions(10, 200)))
        .unwrap();

    let result = service.evaluate_experiment(EXP).await.unwrap();
    assert_eq!(result.test_type(), TestType::None);
    assert_eq!(result.skipped_variants(), &[2]);
    assert_eq!(result.low_confidence_variants(), &[2]);
    assert_eq!(store.state(EXP), Some(ExperimentState::Running));
}

#[tokio::test]
async fn test_clamped_upstream_counters_flag_low_confidence() {
    let (store, service) = setup(false);
    let upstream = serde_json::json!({
        "sent": 1000,
        "delivered": 1000,
        "converted": 120,
        "unsubscribed": -3
    });
    store
        .record_snapshot(EXP, MetricSnapshot::new(1, conversions(100, 1000)))
        .unwrap();
    store
        .record_snapshot(EXP, MetricSnapshot::from_json(2, &upstream))
        .unwrap();

    let result = service.evaluate_experiment(EXP).await.unwrap();
    assert_eq!(result.test_type(), TestType::ZTest);
    assert!(result.skipped_variants().is_empty());
    assert_eq!(result.low_confidence_variants(), &[2]);
}

#[test]
fn test_required_sample_size_through_service() {
    let (_store, service) = setup(false);
    assert_eq!(service.required_sample_size(0.10, 0.20, 95.0, 0.8).unwrap(), 3839);
    assert!(service.required_sample_size(0.10, 0.0, 95.0, 0.8).is_err());
}
