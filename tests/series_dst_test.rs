//! Series Deterministic Simulation Tests
//!
//! DST tests for the time series engine with multiple seeds.

use redis_timeseries::timeseries::{
    run_series_batch, summarize_series_batch, SeriesDSTConfig, SeriesDSTHarness,
};

// =============================================================================
// Standard Configuration Tests - 50+ Seeds
// =============================================================================

#[test]
fn test_series_dst_50_seeds_standard() {
    let results = run_series_batch(0, 50, 300, SeriesDSTConfig::new);
    let summary = summarize_series_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass with standard config");
}

#[test]
fn test_series_dst_50_seeds_eastern() {
    let results = run_series_batch(1000, 50, 300, SeriesDSTConfig::eastern);
    let summary = summarize_series_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass across the DST change");
}

#[test]
fn test_series_dst_50_seeds_long_gaps() {
    let results = run_series_batch(2000, 50, 300, SeriesDSTConfig::long_gaps);
    let summary = summarize_series_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 50, "All 50 seeds should pass with long gaps");

    // Long gaps must actually exercise expiry
    let expired: u64 = results.iter().map(|r| r.expired_shards).sum();
    assert!(expired > 0, "Long gaps should expire shards");
}

// =============================================================================
// Stress Tests
// =============================================================================

#[test]
fn test_series_dst_stress_2000_ops() {
    let mut harness = SeriesDSTHarness::with_seed(42);
    harness.run(2000);
    let result = harness.result();
    println!("Stress 2000 ops: {}", result.summary());
    assert!(result.is_success(), "{:?}", result.invariant_violations);
    assert!(result.queries > 0 && result.batches > 0 && result.scans > 0);
}

#[test]
fn test_series_dst_eastern_stress_2000_ops() {
    // One-hour steps from 2017-03-10 cross the 2017-03-12 change early on
    let mut harness = SeriesDSTHarness::new(SeriesDSTConfig::eastern(99999));
    harness.run(2000);
    let result = harness.result();
    println!("Eastern stress 2000 ops: {}", result.summary());
    assert!(result.is_success(), "{:?}", result.invariant_violations);
}

// =============================================================================
// Edge Case Tests
// =============================================================================

#[test]
fn test_series_dst_single_series_no_time_steps() {
    // Every write lands in the same buckets
    let config = SeriesDSTConfig {
        seed: 77777,
        num_series: 1,
        max_time_step_secs: 0,
        ..SeriesDSTConfig::default()
    };

    let mut harness = SeriesDSTHarness::new(config);
    harness.run(500);
    let result = harness.result();
    println!("Single series: {}", result.summary());
    assert!(result.is_success(), "{:?}", result.invariant_violations);
    assert_eq!(result.expired_shards, 0);
}

#[test]
fn test_series_dst_decrease_heavy() {
    let config = SeriesDSTConfig {
        seed: 88888,
        decrease_prob: 0.8,
        ..SeriesDSTConfig::default()
    };

    let mut harness = SeriesDSTHarness::new(config);
    harness.run(1000);
    let result = harness.result();
    println!("Decrease heavy: {}", result.summary());
    assert!(result.is_success(), "{:?}", result.invariant_violations);
}

#[test]
fn test_series_dst_determinism() {
    let a = run_series_batch(31337, 3, 300, SeriesDSTConfig::new);
    let b = run_series_batch(31337, 3, 300, SeriesDSTConfig::new);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.summary(), y.summary(), "Same seed must replay identically");
    }
}
