//! Campaign Sweep Example
//!
//! Runs three email experiments through a scheduler sweep, then declares a
//! winner by hand for the one that is still undecided.
//!
//! Run with: cargo run --example campaign_sweep
//! Set `RUST_LOG=campaign_experiments=debug` for the engine's logs.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use campaign_experiments::backend::MemoryExperimentStore;
use campaign_experiments::config::{EngineConfig, TestConfig, WinnerMetric};
use campaign_experiments::experiment::{Experiment, MetricSnapshot, RawCounters, Variant};
use campaign_experiments::metrics::MetricsAggregator;
use campaign_experiments::scheduler::ExperimentScheduler;
use campaign_experiments::service::ExperimentService;

fn counters(sent: u64, opened: u64, clicked: u64, converted: u64) -> RawCounters {
    RawCounters {
        sent,
        delivered: sent - sent / 40,
        opened,
        clicked,
        replied: clicked / 10,
        converted,
        unsubscribed: sent / 500,
        bounced: sent / 40,
    }
}

fn experiment(id: &str, name: &str, variants: &[&str], config: TestConfig) -> Experiment {
    #[allow(clippy::cast_precision_loss)]
    let share = 100.0 / variants.len() as f64;
    variants
        .iter()
        .zip(1u64..)
        .fold(Experiment::builder(id, name).config(config), |b, (label, vid)| {
            b.variant(Variant::new(vid, *label, share))
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    println!("=== Campaign Experiments Sweep ===\n");

    // -------------------------------------------------------------------------
    // 1. Register experiments
    // -------------------------------------------------------------------------
    println!("1. Registering experiments...");

    let store = Arc::new(MemoryExperimentStore::new());
    let now = Utc::now();

    store.add_experiment(experiment(
        "spring-subject",
        "Spring sale subject line",
        &["Control", "Urgency"],
        TestConfig {
            winner_metric: WinnerMetric::OpenRate,
            auto_select_winner: true,
            ..TestConfig::default()
        },
    ));
    store.add_experiment(experiment(
        "cta-colour",
        "Call-to-action colour",
        &["Blue", "Green", "Orange"],
        TestConfig {
            winner_metric: WinnerMetric::ConversionRate,
            auto_select_winner: true,
            ..TestConfig::default()
        },
    ));
    store.add_experiment(experiment(
        "follow-up-tone",
        "Follow-up tone",
        &["Formal", "Casual"],
        TestConfig {
            winner_metric: WinnerMetric::EngagementScore,
            minimum_sample_size: 500,
            ..TestConfig::default()
        },
    ));
    for id in ["spring-subject", "cta-colour", "follow-up-tone"] {
        store.start_experiment(id, now)?;
    }
    println!("   {} experiments running", store.experiment_count());

    // -------------------------------------------------------------------------
    // 2. Ingest counters
    // -------------------------------------------------------------------------
    println!("\n2. Ingesting counters...");

    store.record_snapshot("spring-subject", MetricSnapshot::new(1, counters(1000, 450, 60, 20)))?;
    store.record_snapshot("spring-subject", MetricSnapshot::new(2, counters(1000, 520, 70, 22)))?;

    store.record_snapshot("cta-colour", MetricSnapshot::new(1, counters(1500, 600, 200, 150)))?;
    store.record_snapshot("cta-colour", MetricSnapshot::new(2, counters(1500, 610, 230, 180)))?;
    store.record_snapshot("cta-colour", MetricSnapshot::new(3, counters(1500, 590, 190, 135)))?;

    let upstream = serde_json::json!({
        "sent": 800, "delivered": 780, "opened": 300, "clicked": -4,
        "replied": 12.7, "converted": "n/a"
    });
    let casual = MetricSnapshot::from_json(2, &upstream);
    println!("   Upstream row clamped: {}", casual.is_clamped());
    let rates = MetricsAggregator::default()
        .aggregate(casual.counters())
        .as_percentages();
    store.record_snapshot("follow-up-tone", MetricSnapshot::new(1, counters(800, 310, 40, 12)))?;
    store.record_snapshot("follow-up-tone", casual)?;

    println!(
        "   follow-up-tone/Casual: open {:.1}%, click {:.1}%, engagement {:.1}%",
        rates.open_rate, rates.click_rate, rates.engagement_score
    );

    // -------------------------------------------------------------------------
    // 3. Sweep
    // -------------------------------------------------------------------------
    println!("\n3. Running sweep...");

    let service = Arc::new(ExperimentService::new(
        Arc::clone(&store),
        EngineConfig::default(),
    ));
    let scheduler = ExperimentScheduler::new(Arc::clone(&service));
    let summary = scheduler.tick().await;
    println!(
        "   Evaluated: {}, winners: {}, errors: {}",
        summary.experiments_evaluated,
        summary.winners_declared,
        summary.errors.len()
    );

    for id in ["spring-subject", "cta-colour", "follow-up-tone"] {
        if let Some(result) = service.latest_result(id).await? {
            println!("   {id}: {}", result.summary_text());
        }
    }

    // -------------------------------------------------------------------------
    // 4. Manual declaration
    // -------------------------------------------------------------------------
    println!("\n4. Declaring follow-up-tone by hand...");

    let decision = service.declare_winner("follow-up-tone", 1, true).await?;
    println!(
        "   Winner: variant {} (forced: {}, by: {:?})",
        decision.winner_variant_id(),
        decision.forced(),
        decision.declared_by()
    );

    // -------------------------------------------------------------------------
    // 5. Planning the next test
    // -------------------------------------------------------------------------
    println!("\n5. Planning...");
    let n = service.required_sample_size(0.10, 0.20, 95.0, 0.8)?;
    println!("   Samples per variant for +20% on a 10% baseline: {n}");

    println!("\n   Run summaries stored: {}", store.run_summaries().len());
    println!("\n=== Done ===");
    Ok(())
}
