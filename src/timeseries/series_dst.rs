//! Deterministic Simulation Testing for the series engine
//!
//! VOPR-style harness driving a `TimeSeries` over a `MemoryStore` with a
//! manual clock:
//! - Seeded random writes, deferred batches, clock jumps, range reads and scans
//! - A reference model of every shard key (fields and expiry) checked after
//!   each operation
//! - Seed-based reproducibility for debugging

use super::engine::{TimeSeries, ALL_SERIES};
use super::granularity::{Granularity, GranularityTable};
use super::key_encoder::ShardKeyEncoder;
use super::time::{bucket_range, round_epoch};
use crate::clock::{Clock, ManualClock};
use crate::store::{MemoryStore, StoreValue};
use ahash::AHashMap;
use chrono_tz::Tz;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};

/// 2017-03-10T00:00:00Z, two days before a US DST change
pub const START_EPOCH: i64 = 1_489_104_000;

/// Upper bound on buckets per simulated range read
const MAX_QUERY_COUNT: i64 = 48;

/// Configuration for Series DST
#[derive(Debug, Clone)]
pub struct SeriesDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of distinct series names
    pub num_series: usize,
    /// Largest absolute amount per write
    pub max_amount: i64,
    /// Probability a write is a decrease
    pub decrease_prob: f64,
    /// Probability of a deferred batch instead of a single write
    pub batch_prob: f64,
    /// Probability of a range read
    pub query_prob: f64,
    /// Probability of a key scan
    pub scan_prob: f64,
    /// Largest clock jump between operations
    pub max_time_step_secs: i64,
    pub timezone: Option<Tz>,
}

impl Default for SeriesDSTConfig {
    fn default() -> Self {
        SeriesDSTConfig {
            seed: 0,
            num_series: 8,
            max_amount: 100,
            decrease_prob: 0.2,
            batch_prob: 0.15,
            query_prob: 0.25,
            scan_prob: 0.05,
            max_time_step_secs: 600,
            timezone: None,
        }
    }
}

impl SeriesDSTConfig {
    pub fn new(seed: u64) -> Self {
        SeriesDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Local-midnight day buckets across a DST change
    pub fn eastern(seed: u64) -> Self {
        SeriesDSTConfig {
            seed,
            timezone: Some(chrono_tz::US::Eastern),
            max_time_step_secs: 3_600,
            ..Default::default()
        }
    }

    /// Long clock jumps, so most shards expire between writes
    pub fn long_gaps(seed: u64) -> Self {
        SeriesDSTConfig {
            seed,
            num_series: 4,
            max_time_step_secs: 6 * 3_600,
            ..Default::default()
        }
    }
}

/// Operation type for logging
#[derive(Debug, Clone)]
pub enum SeriesOp {
    Write { series: String, amount: i64 },
    Batch { writes: usize },
    Query { series: String, granularity: String, count: usize },
    Scan { granularity: String, count: usize },
}

/// Result of a Series DST run
#[derive(Debug, Clone)]
pub struct SeriesDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub writes: u64,
    pub batches: u64,
    pub queries: u64,
    pub scans: u64,
    /// Model shards whose lifetime ran out
    pub expired_shards: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<SeriesOp>,
}

impl SeriesDSTResult {
    pub fn new(seed: u64) -> Self {
        SeriesDSTResult {
            seed,
            total_operations: 0,
            writes: 0,
            batches: 0,
            queries: 0,
            scans: 0,
            expired_shards: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (writes:{}, batches:{}, queries:{}, scans:{}, expired:{}), {} violations",
            self.seed,
            self.total_operations,
            self.writes,
            self.batches,
            self.queries,
            self.scans,
            self.expired_shards,
            self.invariant_violations.len()
        )
    }
}

/// Expected state of one shard key
#[derive(Debug, Default)]
struct ShardModel {
    expires_at: i64,
    fields: BTreeMap<i64, i64>,
}

/// DST harness for TimeSeries
pub struct SeriesDSTHarness {
    config: SeriesDSTConfig,
    rng: ChaCha8Rng,
    clock: ManualClock,
    engine: TimeSeries<MemoryStore>,
    granularities: GranularityTable,
    keys: ShardKeyEncoder,
    result: SeriesDSTResult,
    model: AHashMap<String, ShardModel>,
}

impl SeriesDSTHarness {
    pub fn new(config: SeriesDSTConfig) -> Self {
        let clock = ManualClock::from_secs(START_EPOCH);
        let store = MemoryStore::with_clock(clock.clone());
        let engine = TimeSeries::with_defaults(store)
            .with_clock(clock.clone())
            .with_timezone(config.timezone);
        SeriesDSTHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            result: SeriesDSTResult::new(config.seed),
            granularities: engine.granularities().clone(),
            keys: ShardKeyEncoder::new(engine.base_key(), config.timezone),
            clock,
            engine,
            model: AHashMap::new(),
            config,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(SeriesDSTConfig::new(seed))
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    fn random_series(&mut self) -> String {
        let idx = self.rng.gen_range(0..self.config.num_series);
        format!("series:{}", idx)
    }

    fn random_amount(&mut self) -> i64 {
        let magnitude = self.rng.gen_range(1..=self.config.max_amount);
        if self.rng.gen_bool(self.config.decrease_prob) {
            -magnitude
        } else {
            magnitude
        }
    }

    fn random_granularity(&mut self) -> Granularity {
        let idx = self.rng.gen_range(0..self.granularities.len());
        self.granularities
            .iter()
            .nth(idx)
            .cloned()
            .unwrap_or_else(|| Granularity::new("1minute", 60, 3_600))
    }

    fn random_count(&mut self, g: &Granularity) -> usize {
        let limit = g.max_count().clamp(1, MAX_QUERY_COUNT);
        self.rng.gen_range(1..=limit) as usize
    }

    /// Apply a write to the model, returning the new field value per
    /// granularity in table order
    fn model_write(&mut self, series: &str, amount: i64) -> Vec<i64> {
        let now = self.now();
        let mut values = Vec::with_capacity(self.granularities.len());

        for g in &self.granularities {
            let bucket = round_epoch(now, g.duration, self.config.timezone);
            let key = self.keys.encode(series, g, bucket);
            let shard = self.model.entry(key).or_default();
            let field = shard.fields.entry(bucket).or_insert(0);
            *field += amount;
            values.push(*field);
            shard.expires_at = now + g.ttl;
        }
        values
    }

    /// Drop model shards whose lifetime has run out
    fn expire_model(&mut self) {
        let now = self.now();
        let before = self.model.len();
        self.model.retain(|_, shard| now < shard.expires_at);
        self.result.expired_shards += (before - self.model.len()) as u64;
    }

    fn model_live(&self, key: &str) -> Option<&ShardModel> {
        let now = self.now();
        self.model.get(key).filter(|shard| now < shard.expires_at)
    }

    fn model_bucket(&self, series: &str, g: &Granularity, bucket: i64) -> i64 {
        let key = self.keys.encode(series, g, bucket);
        self.model_live(&key)
            .and_then(|shard| shard.fields.get(&bucket).copied())
            .unwrap_or(0)
    }

    fn run_write(&mut self) -> Result<(), String> {
        let series = self.random_series();
        let amount = self.random_amount();
        self.result.last_op = Some(SeriesOp::Write {
            series: series.clone(),
            amount,
        });

        let outcome = if amount < 0 {
            self.engine.decrease(&series, -amount, None)
        } else {
            self.engine.increase(&series, amount, None)
        };
        outcome.map_err(|e| format!("write failed: {}", e))?;
        self.model_write(&series, amount);
        self.result.writes += 1;
        Ok(())
    }

    fn run_batch(&mut self) -> Result<(), String> {
        let writes = self.rng.gen_range(1..=4);
        self.result.last_op = Some(SeriesOp::Batch { writes });

        let mut batch = self.engine.begin_batch();
        let mut expected = Vec::new();
        for _ in 0..writes {
            let series = self.random_series();
            let amount = self.random_amount();
            self.engine
                .queue_increase(&mut batch, &series, amount, None)
                .map_err(|e| format!("queue failed: {}", e))?;
            expected.extend(self.model_write(&series, amount));
        }

        // Invariant 1: a batch holds an increment and an expire per granularity per write
        if batch.len() != 2 * writes * self.granularities.len() || batch.writes() != writes {
            return Err(format!(
                "Batch size mismatch: {} commands for {} writes",
                batch.len(),
                writes
            ));
        }

        let replies = self
            .engine
            .execute(&mut batch)
            .map_err(|e| format!("execute failed: {}", e))?;

        // Invariant 2: batch is empty after execute
        if !batch.is_empty() {
            return Err("Batch not reset after execute".to_string());
        }

        // Invariant 3: increment replies are the running field values, expires succeed
        for (i, pair) in replies.chunks(2).enumerate() {
            let want = expected.get(i).copied();
            match pair {
                [StoreValue::Integer(got), StoreValue::Integer(1)] if Some(*got) == want => {}
                other => {
                    return Err(format!(
                        "Batch reply #{} mismatch: got {:?}, expected field value {:?}",
                        i, other, want
                    ))
                }
            }
        }

        self.result.batches += 1;
        self.result.writes += writes as u64;
        Ok(())
    }

    fn run_query(&mut self) -> Result<(), String> {
        let series = self.random_series();
        let g = self.random_granularity();
        let count = self.random_count(&g);
        self.result.last_op = Some(SeriesOp::Query {
            series: series.clone(),
            granularity: g.name.clone(),
            count,
        });

        let buckets = self
            .engine
            .get_buckets(&series, &g.name, count, None)
            .map_err(|e| format!("get_buckets failed: {}", e))?;

        // Invariant 4: exactly count buckets
        if buckets.len() != count {
            return Err(format!("Expected {} buckets, got {}", count, buckets.len()));
        }

        // Invariant 5: strictly increasing, ending at the current bucket
        if !buckets.windows(2).all(|w| w[0].epoch() < w[1].epoch()) {
            return Err("Bucket timestamps not strictly increasing".to_string());
        }
        let current = round_epoch(self.now(), g.duration, self.config.timezone);
        if buckets.last().map(|b| b.epoch()) != Some(current) {
            return Err(format!("Last bucket is not the current bucket {}", current));
        }

        // Invariant 6: every bucket matches the model
        for bucket in &buckets {
            let want = self.model_bucket(&series, &g, bucket.epoch());
            if bucket.amount.as_i64() != want {
                return Err(format!(
                    "Bucket {} of {}/{}: got {}, expected {}",
                    bucket.epoch(),
                    series,
                    g.name,
                    bucket.amount,
                    want
                ));
            }
        }

        // Invariant 7: total is the bucket sum
        let sum: i64 = buckets.iter().map(|b| b.amount.as_i64()).sum();
        let total = self
            .engine
            .get_total(&series, &g.name, count, None)
            .map_err(|e| format!("get_total failed: {}", e))?;
        if total.as_i64() != sum {
            return Err(format!("Total {} != bucket sum {}", total, sum));
        }

        self.result.queries += 1;
        Ok(())
    }

    fn run_scan(&mut self) -> Result<(), String> {
        let g = self.random_granularity();
        let count = self.random_count(&g);
        self.result.last_op = Some(SeriesOp::Scan {
            granularity: g.name.clone(),
            count,
        });

        let names = self
            .engine
            .scan_keys(&g.name, count, ALL_SERIES, None)
            .map_err(|e| format!("scan_keys failed: {}", e))?;

        let window =
            bucket_range(self.now(), g.duration, count, self.config.timezone);
        let expected: BTreeSet<String> = (0..self.config.num_series)
            .map(|i| format!("series:{}", i))
            .filter(|series| {
                window
                    .iter()
                    .any(|&b| self.model_live(&self.keys.encode(series, &g, b)).is_some())
            })
            .collect();

        // Invariant 8: scan finds exactly the series with a live shard in the window
        let got: BTreeSet<String> = names.iter().cloned().collect();
        if got != expected || got.len() != names.len() {
            return Err(format!("Scan mismatch: got {:?}, expected {:?}", names, expected));
        }

        self.result.scans += 1;
        Ok(())
    }

    fn run_single_op(&mut self) {
        let step = self.rng.gen_range(0..=self.config.max_time_step_secs);
        self.clock.advance_secs(step);
        self.expire_model();

        let roll: f64 = self.rng.gen();
        let query_cut = self.config.query_prob;
        let scan_cut = query_cut + self.config.scan_prob;
        let batch_cut = scan_cut + self.config.batch_prob;

        let outcome = if roll < query_cut {
            self.run_query()
        } else if roll < scan_cut {
            self.run_scan()
        } else if roll < batch_cut {
            self.run_batch()
        } else {
            self.run_write()
        };

        self.result.total_operations += 1;

        if let Err(violation) = outcome {
            self.result.invariant_violations.push(format!(
                "Op #{} at {}: {:?} - {}",
                self.result.total_operations,
                self.now(),
                self.result.last_op,
                violation
            ));
        }
    }

    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.run_single_op();
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
    }

    pub fn result(&self) -> &SeriesDSTResult {
        &self.result
    }

    pub fn engine(&self) -> &TimeSeries<MemoryStore> {
        &self.engine
    }
}

/// Run a batch of DST tests
pub fn run_series_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> SeriesDSTConfig,
) -> Vec<SeriesDSTResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            let mut harness = SeriesDSTHarness::new(config_fn(seed));
            harness.run(ops_per_seed);
            harness.result().clone()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_series_batch(results: &[SeriesDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();

    let mut summary = format!(
        "Series DST Summary\n\
         ==================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n",
        total, passed, failed, total_ops
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_dst_single_seed() {
        let mut harness = SeriesDSTHarness::with_seed(12345);
        harness.run(200);
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "Seed 12345 failed: {:?}", result.invariant_violations);
    }

    #[test]
    fn test_series_dst_eastern() {
        let mut harness = SeriesDSTHarness::new(SeriesDSTConfig::eastern(7));
        harness.run(300);
        let result = harness.result();
        println!("{}", result.summary());
        assert_eq!(harness.engine().timezone(), Some(chrono_tz::US::Eastern));
        assert!(result.is_success(), "{:?}", result.invariant_violations);
    }

    #[test]
    fn test_series_dst_5_seeds() {
        let results = run_series_batch(0, 5, 200, SeriesDSTConfig::new);
        let summary = summarize_series_batch(&results);
        println!("{}", summary);

        let passed = results.iter().filter(|r| r.is_success()).count();
        assert_eq!(passed, 5, "All 5 seeds should pass");
    }
}
