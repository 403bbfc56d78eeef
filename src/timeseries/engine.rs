//! Series engine
//!
//! Writes fan out to every configured granularity: one hash increment on the
//! bucket's shard key plus an expiry refresh, all submitted as one atomic
//! group. Reads enumerate the bucket window, fetch every bucket in one group
//! and zip the replies back with their timestamps, filling gaps with zero.
//!
//! Every public operation is exactly one round trip to the store, except
//! queueing into a `WriteBatch`, which touches nothing until `execute`.

use super::amount::{Amount, AmountKind};
use super::config::TimeSeriesConfig;
use super::error::{Result, TimeSeriesError};
use super::granularity::{Granularity, GranularityTable};
use super::key_encoder::{strip_prefixes, ShardKeyEncoder};
use super::time::{bucket_range, round_time, to_datetime};
use crate::clock::{Clock, SystemClock};
use crate::store::{Store, StoreCommand, StoreValue};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Search pattern matching every series
pub const ALL_SERIES: &str = "*";

/// One bucket of a range read
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Start of the bucket
    pub timestamp: DateTime<Utc>,
    pub amount: Amount,
}

impl Bucket {
    pub fn epoch(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Deferred writes, held by the caller and flushed with
/// [`TimeSeries::execute`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    commands: Vec<StoreCommand>,
    writes: usize,
}

impl WriteBatch {
    /// Number of store commands queued
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of increase/decrease calls queued
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn commands(&self) -> &[StoreCommand] {
        &self.commands
    }
}

/// Multi-resolution counter store over a [`Store`]
pub struct TimeSeries<S> {
    store: S,
    keys: ShardKeyEncoder,
    granularities: GranularityTable,
    kind: AmountKind,
    clock: Arc<dyn Clock>,
}

impl<S: Store> TimeSeries<S> {
    pub fn new(store: S, config: TimeSeriesConfig) -> Result<Self> {
        config.validate()?;
        let timezone = config.parse_timezone()?;
        let granularities = config.granularity_table()?;
        debug!(
            base_key = %config.base_key,
            granularities = granularities.len(),
            use_float = config.use_float,
            timezone = ?timezone,
            "time series engine created"
        );

        Ok(TimeSeries {
            store,
            keys: ShardKeyEncoder::new(config.base_key.clone(), timezone),
            granularities,
            kind: config.amount_kind(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Engine with the default configuration
    pub fn with_defaults(store: S) -> Self {
        let config = TimeSeriesConfig::default();
        TimeSeries {
            store,
            keys: ShardKeyEncoder::new(config.base_key, None),
            granularities: GranularityTable::default(),
            kind: AmountKind::Integer,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the timezone used for calendar-aligned buckets
    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.keys = ShardKeyEncoder::new(self.keys.base_key(), timezone);
        self
    }

    /// Source of "now" for calls without a timestamp
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn base_key(&self) -> &str {
        self.keys.base_key()
    }

    pub fn timezone(&self) -> Option<Tz> {
        self.keys.timezone()
    }

    pub fn amount_kind(&self) -> AmountKind {
        self.kind
    }

    pub fn granularities(&self) -> &GranularityTable {
        &self.granularities
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Shard key `series` writes to at `timestamp` in `granularity`
    pub fn shard_key(
        &self,
        series: &str,
        granularity: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<String> {
        let g = self.granularities.get(granularity)?;
        let bucket = round_time(timestamp, g.duration, self.timezone());
        Ok(self.keys.encode(series, g, bucket))
    }

    // ---- writes ----

    /// Add `amount` to `series` in every granularity
    pub fn increase(
        &mut self,
        series: &str,
        amount: impl Into<Amount>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut batch = self.begin_batch();
        self.queue_increase(&mut batch, series, amount, timestamp)?;
        self.execute(&mut batch)?;
        Ok(())
    }

    /// Subtract `amount` from `series` in every granularity
    pub fn decrease(
        &mut self,
        series: &str,
        amount: impl Into<Amount>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut batch = self.begin_batch();
        self.queue_decrease(&mut batch, series, amount, timestamp)?;
        self.execute(&mut batch)?;
        Ok(())
    }

    /// Count `count` hits of `series`
    pub fn record_hit(
        &mut self,
        series: &str,
        timestamp: Option<DateTime<Utc>>,
        count: i64,
    ) -> Result<()> {
        self.increase(series, count, timestamp)
    }

    pub fn begin_batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    pub fn queue_increase(
        &self,
        batch: &mut WriteBatch,
        series: &str,
        amount: impl Into<Amount>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let amount = self.kind.coerce(amount.into())?;
        self.queue_write(batch, series, amount, timestamp);
        Ok(())
    }

    pub fn queue_decrease(
        &self,
        batch: &mut WriteBatch,
        series: &str,
        amount: impl Into<Amount>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let amount = self.kind.coerce(amount.into())?;
        let negated = amount.checked_neg().ok_or_else(|| {
            TimeSeriesError::InvalidAmount(format!("cannot decrease by {}", amount))
        })?;
        self.queue_write(batch, series, negated, timestamp);
        Ok(())
    }

    /// Submit a batch as one group and reset it. Returns the raw replies in
    /// submission order, two per granularity per queued write. An empty
    /// batch makes no round trip.
    pub fn execute(&mut self, batch: &mut WriteBatch) -> Result<Vec<StoreValue>> {
        let taken = std::mem::take(batch);
        if taken.commands.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            writes = taken.writes,
            commands = taken.commands.len(),
            "executing write batch"
        );
        let replies = self.store.execute_grouped(&taken.commands)?;

        debug_assert!(batch.is_empty(), "Postcondition: batch reset after execute");
        Ok(replies)
    }

    fn queue_write(
        &self,
        batch: &mut WriteBatch,
        series: &str,
        amount: Amount,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let queued_before = batch.commands.len();

        for g in &self.granularities {
            let bucket = round_time(timestamp, g.duration, self.timezone());
            let key = self.keys.encode(series, g, bucket);
            trace!(series, granularity = %g.name, bucket, key = %key, "queue bucket write");

            let field = bucket.to_string();
            batch.commands.push(match amount {
                Amount::Integer(increment) => StoreCommand::HIncrBy {
                    key: key.clone(),
                    field,
                    increment,
                },
                Amount::Float(increment) => StoreCommand::HIncrByFloat {
                    key: key.clone(),
                    field,
                    increment,
                },
            });
            batch.commands.push(StoreCommand::Expire { key, seconds: g.ttl });
        }
        batch.writes += 1;

        debug_assert_eq!(
            batch.commands.len() - queued_before,
            2 * self.granularities.len(),
            "Postcondition: increment and expire per granularity"
        );
    }

    // ---- reads ----

    /// The `count` buckets ending with the one containing `timestamp` (or
    /// now), oldest first. Buckets without data read as zero.
    pub fn get_buckets(
        &mut self,
        series: &str,
        granularity: &str,
        count: usize,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bucket>> {
        let g = self.checked_granularity(granularity, count)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let epochs = self.window(&g, count, timestamp);
        let commands: Vec<StoreCommand> = epochs
            .iter()
            .map(|&bucket| StoreCommand::HGet {
                key: self.keys.encode(series, &g, bucket),
                field: bucket.to_string(),
            })
            .collect();

        debug!(series, granularity, count, "fetching buckets");
        let replies = self.store.execute_grouped(&commands)?;
        if replies.len() != epochs.len() {
            return Err(TimeSeriesError::UnexpectedReply(format!(
                "expected {} bucket replies, got {}",
                epochs.len(),
                replies.len()
            )));
        }

        let buckets = epochs
            .iter()
            .zip(replies.iter())
            .map(|(&bucket, reply)| {
                let amount = self.kind.parse(reply).inspect_err(|e| {
                    warn!(series, granularity, bucket, error = %e, "unreadable bucket value");
                })?;
                Ok(Bucket {
                    timestamp: to_datetime(bucket),
                    amount,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug_assert_eq!(buckets.len(), count, "Postcondition: exactly count buckets");
        Ok(buckets)
    }

    /// Sum of [`get_buckets`](Self::get_buckets)
    pub fn get_total(
        &mut self,
        series: &str,
        granularity: &str,
        count: usize,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Amount> {
        let buckets = self.get_buckets(series, granularity, count, timestamp)?;
        Ok(self.kind.sum(buckets.into_iter().map(|b| b.amount)))
    }

    // ---- discovery ----

    /// Names of series matching the glob `search` that have a live shard in
    /// the window, sorted and distinct.
    ///
    /// Names are recovered by stripping key prefixes, so series whose names
    /// contain `:` or glob characters may be reported incorrectly.
    pub fn scan_keys(
        &mut self,
        granularity: &str,
        count: usize,
        search: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let g = self.checked_granularity(granularity, count)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut patterns: Vec<String> = Vec::new();
        let mut prefixes: Vec<String> = Vec::new();
        for bucket in self.window(&g, count, timestamp) {
            let pattern = self.keys.pattern(search, &g, bucket);
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
            let prefix = self.keys.prefix(&g, bucket);
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }

        let commands: Vec<StoreCommand> = patterns
            .iter()
            .map(|pattern| StoreCommand::Keys {
                pattern: pattern.clone(),
            })
            .collect();

        debug!(granularity, count, search, patterns = commands.len(), "scanning keys");
        let replies = self.store.execute_grouped(&commands)?;

        let mut names = BTreeSet::new();
        for reply in replies {
            match reply {
                StoreValue::Array(items) => {
                    for item in items {
                        match item {
                            StoreValue::Bulk(bytes) => {
                                names.insert(strip_prefixes(&bytes, &prefixes));
                            }
                            StoreValue::Status(text) => {
                                names.insert(strip_prefixes(text.as_bytes(), &prefixes));
                            }
                            other => {
                                return Err(TimeSeriesError::UnexpectedReply(format!(
                                    "expected a key, got {:?}",
                                    other
                                )))
                            }
                        }
                    }
                }
                StoreValue::Nil => {}
                other => {
                    return Err(TimeSeriesError::UnexpectedReply(format!(
                        "expected a key list, got {:?}",
                        other
                    )))
                }
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Resolve a granularity and check the count against its retention,
    /// before any store access
    fn checked_granularity(&self, name: &str, count: usize) -> Result<Granularity> {
        let g = self.granularities.get(name)?;
        g.check_count(count)?;
        Ok(g.clone())
    }

    fn window(&self, g: &Granularity, count: usize, timestamp: Option<DateTime<Utc>>) -> Vec<i64> {
        let anchor = timestamp.unwrap_or_else(|| self.clock.now());
        bucket_range(anchor.timestamp(), g.duration, count, self.timezone())
    }
}

impl<S> std::fmt::Debug for TimeSeries<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeries")
            .field("keys", &self.keys)
            .field("granularities", &self.granularities)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::timeseries::granularity::{hours, minutes};
    use chrono::TimeZone;

    fn engine(config: TimeSeriesConfig) -> (TimeSeries<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2017, 7, 16, 12, 0, 0).unwrap());
        let store = MemoryStore::with_clock(clock.clone());
        let ts = TimeSeries::new(store, config).unwrap().with_clock(clock.clone());
        (ts, clock)
    }

    fn small_table() -> Vec<Granularity> {
        vec![
            Granularity::new("1m", minutes(1), hours(1)),
            Granularity::new("1h", hours(1), hours(24)),
        ]
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let bad_tz = TimeSeriesConfig::default().with_timezone("Nowhere/Special");
        assert!(TimeSeries::new(MemoryStore::new(), bad_tz)
            .unwrap_err()
            .is_configuration());

        let bad_table =
            TimeSeriesConfig::default().with_granularities(vec![Granularity::new("x", 60, 30)]);
        assert!(TimeSeries::new(MemoryStore::new(), bad_table)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_write_fans_out_in_one_round_trip() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test().with_granularities(small_table()));
        ts.increase("hits", 3, None).unwrap();

        assert_eq!(ts.store().groups_processed(), 1);
        assert_eq!(ts.store().commands_processed(), 4);
        assert_eq!(ts.store().len(), 2);

        let now = ts.now();
        let minute_key = ts.shard_key("hits", "1m", now).unwrap();
        let hour_key = ts.shard_key("hits", "1h", now).unwrap();
        assert_eq!(ts.store().ttl(&minute_key), hours(1));
        assert_eq!(ts.store().ttl(&hour_key), hours(24));
        assert_eq!(
            ts.store().hash_fields(&minute_key),
            vec![(now.timestamp().to_string(), "3".to_string())]
        );
    }

    #[test]
    fn test_queue_builds_increment_and_expire() {
        let (ts, _clock) = engine(TimeSeriesConfig::test().with_granularities(small_table()));
        let mut batch = ts.begin_batch();
        ts.queue_increase(&mut batch, "s", 2, None).unwrap();

        assert_eq!(batch.writes(), 1);
        let names: Vec<&str> = batch.commands().iter().map(StoreCommand::name).collect();
        assert_eq!(names, vec!["HINCRBY", "EXPIRE", "HINCRBY", "EXPIRE"]);
        assert!(batch.commands().iter().all(|c| c.key().starts_with("tests:")));
    }

    #[test]
    fn test_execute_resets_batch() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test().with_granularities(small_table()));
        let mut batch = ts.begin_batch();
        ts.queue_increase(&mut batch, "s", 1, None).unwrap();
        ts.queue_decrease(&mut batch, "s", 4, None).unwrap();

        let replies = ts.execute(&mut batch).unwrap();
        assert_eq!(replies.len(), 8);
        assert_eq!(replies[0], StoreValue::Integer(1));
        assert_eq!(replies[4], StoreValue::Integer(-3));
        assert!(batch.is_empty());
        assert_eq!(batch.writes(), 0);

        // Nothing queued, nothing sent
        assert!(ts.execute(&mut batch).unwrap().is_empty());
        assert_eq!(ts.store().groups_processed(), 1);
    }

    #[test]
    fn test_range_error_before_store_access() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test().with_granularities(small_table()));
        let err = ts.get_buckets("s", "1m", 61, None).unwrap_err();
        assert!(err.is_range());
        assert!(ts.scan_keys("1m", 61, ALL_SERIES, None).unwrap_err().is_range());
        assert!(ts.get_total("s", "1h", 25, None).unwrap_err().is_range());
        assert_eq!(ts.store().groups_processed(), 0);
    }

    #[test]
    fn test_unknown_granularity() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test());
        assert!(ts.get_buckets("s", "1week", 1, None).unwrap_err().is_configuration());
        assert!(ts.shard_key("s", "1week", ts.now()).unwrap_err().is_configuration());
    }

    #[test]
    fn test_zero_count_reads_nothing() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test());
        assert!(ts.get_buckets("s", "1minute", 0, None).unwrap().is_empty());
        assert_eq!(ts.get_total("s", "1minute", 0, None).unwrap(), 0i64);
        assert!(ts.scan_keys("1minute", 0, ALL_SERIES, None).unwrap().is_empty());
        assert_eq!(ts.store().groups_processed(), 0);
    }

    #[test]
    fn test_gap_filled_buckets() {
        let (mut ts, clock) = engine(TimeSeriesConfig::test().with_granularities(small_table()));
        ts.increase("s", 1, None).unwrap();
        clock.advance_secs(minutes(2));
        ts.increase("s", 5, None).unwrap();

        let buckets = ts.get_buckets("s", "1m", 4, None).unwrap();
        let amounts: Vec<i64> = buckets.iter().map(|b| b.amount.as_i64()).collect();
        assert_eq!(amounts, vec![0, 1, 0, 5]);
        assert!(buckets.windows(2).all(|w| w[1].epoch() - w[0].epoch() == minutes(1)));
        assert_eq!(buckets[3].timestamp, ts.now());
    }

    #[test]
    fn test_integer_mode_rejects_fractions() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test());
        let err = ts.increase("s", 1.5, None).unwrap_err();
        assert!(matches!(err, TimeSeriesError::InvalidAmount(_)));
        assert!(ts.decrease("s", i64::MIN, None).is_err());
        assert_eq!(ts.store().groups_processed(), 0);

        // Whole floats are accepted
        ts.increase("s", 2.0, None).unwrap();
        assert_eq!(ts.get_total("s", "1minute", 1, None).unwrap(), 2i64);
    }

    #[test]
    fn test_float_mode() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test().with_float(true));
        ts.increase("f", 5, None).unwrap();
        ts.decrease("f", 2.5, None).unwrap();
        assert_eq!(ts.get_total("f", "1hour", 1, None).unwrap(), Amount::Float(2.5));
        assert!(ts.increase("f", f64::NAN, None).is_err());
    }

    #[test]
    fn test_record_hit() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test());
        ts.record_hit("page", None, 1).unwrap();
        ts.record_hit("page", None, 2).unwrap();
        assert_eq!(ts.get_total("page", "1day", 1, None).unwrap(), 3i64);
    }

    #[test]
    fn test_non_numeric_bucket_is_unexpected_reply() {
        let (mut ts, _clock) = engine(TimeSeriesConfig::test().with_granularities(small_table()));
        ts.increase("s", 1, None).unwrap();

        // Corrupt the bucket with a float the integer engine cannot read
        let key = ts.shard_key("s", "1m", ts.now()).unwrap();
        let field = ts.now().timestamp().to_string();
        ts.store_mut()
            .hash_increment_float(&key, &field, 0.5)
            .unwrap();

        let err = ts.get_buckets("s", "1m", 1, None).unwrap_err();
        assert!(matches!(err, TimeSeriesError::UnexpectedReply(_)));
    }

    #[test]
    fn test_with_defaults() {
        let ts = TimeSeries::with_defaults(MemoryStore::new());
        assert_eq!(ts.base_key(), "stats");
        assert_eq!(ts.timezone(), None);
        assert_eq!(ts.amount_kind(), AmountKind::Integer);
        assert_eq!(ts.granularities().len(), 5);
    }
}
