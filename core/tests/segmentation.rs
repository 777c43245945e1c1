use clv_core::clv::{self, SegmentLabel};
use clv_core::config::{EngineConfig, SegmentRule};
use clv_core::demo::DemoDataset;
use clv_core::engine::ClvEngine;
use clv_core::store::ClvStore;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn engine_with_rule(run_id: &str, rule: SegmentRule) -> ClvEngine {
    let store = ClvStore::in_memory().unwrap();
    store.migrate().unwrap();
    let config = EngineConfig { segments: rule, ..EngineConfig::default_test() };
    ClvEngine::build(run_id.into(), config, store).unwrap()
}

fn scored(run_id: &str, rule: SegmentRule, seed: u64) -> ClvEngine {
    let mut engine = engine_with_rule(run_id, rule);
    let transactions = DemoDataset { customers: 150, ..DemoDataset::default() }.generate(seed);
    engine.load_transactions("demo", transactions).unwrap();
    engine.recompute().unwrap();
    engine
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Every scored customer gets exactly one label, and the label agrees with
/// the published cut-offs: the three segments partition the population.
#[test]
fn every_customer_lands_in_exactly_one_segment() {
    let engine = scored("partition", SegmentRule::default(), 21);
    let summary = engine.summary().unwrap();

    let labelled =
        summary.segments.high_value + summary.segments.nurture + summary.segments.low_priority;
    assert_eq!(labelled as usize, summary.customer_count);

    for estimate in engine.top_customers(summary.customer_count).unwrap() {
        assert!(estimate.predicted_clv >= 0.0, "{}: negative CLV", estimate.customer_id);
        let expected = clv::label_for(estimate.predicted_clv, summary.cutoffs);
        assert_eq!(
            estimate.segment, expected,
            "{} at {} disagrees with cutoffs", estimate.customer_id, estimate.predicted_clv
        );
    }
}

/// Quantile cut-offs adapt to the population: roughly the top fifth of
/// customers should be labelled high-value under the 0.8 quantile rule.
#[test]
fn quantile_rule_tracks_the_population() {
    let engine = scored(
        "quantile",
        SegmentRule::Quantile { high_value: 0.8, nurture: 0.4 },
        33,
    );
    let summary = engine.summary().unwrap();

    let n = summary.customer_count as f64;
    let high = summary.segments.high_value as f64;
    // Ties at the cut-off can shift the split, not by much.
    assert!(
        high <= n * 0.35,
        "{high} of {n} customers above the 0.8 quantile"
    );
    assert!(high >= 1.0, "nobody above the 0.8 quantile");
    assert!(summary.cutoffs.high_value > summary.cutoffs.nurture);
}

/// Absolute cut-offs ignore the population entirely; setting them beyond
/// any plausible value pushes everyone into low-priority.
#[test]
fn absolute_rule_is_population_independent() {
    let engine = scored(
        "absolute",
        SegmentRule::Absolute { high_value: 1e12, nurture: 1e11 },
        33,
    );
    let summary = engine.summary().unwrap();

    assert_eq!(summary.segments.high_value, 0);
    assert_eq!(summary.segments.nurture, 0);
    assert_eq!(summary.segments.low_priority as usize, summary.customer_count);
    assert_eq!(summary.cutoffs.high_value, 1e12);
}

/// A rule whose cut-offs do not order correctly is rejected when the
/// engine is built, before any data is loaded.
#[test]
fn misordered_rule_rejected_at_build_time() {
    let store = ClvStore::in_memory().unwrap();
    store.migrate().unwrap();
    let config = EngineConfig {
        segments: SegmentRule::Quantile { high_value: 0.3, nurture: 0.7 },
        ..EngineConfig::default_test()
    };
    assert!(ClvEngine::build("bad-rule".into(), config, store).is_err());
}

/// Re-running the pipeline with a different horizon rescales the values
/// but keeps the partition exhaustive.
#[test]
fn partition_survives_horizon_change() {
    let mut engine = scored("horizon", SegmentRule::default(), 55);
    engine.set_horizon_months(6).unwrap();
    engine.recompute().unwrap();

    let summary = engine.summary().unwrap();
    let labelled =
        summary.segments.high_value + summary.segments.nurture + summary.segments.low_priority;
    assert_eq!(labelled as usize, summary.customer_count);
}
