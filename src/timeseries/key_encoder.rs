//! Shard key encoding
//!
//! Key format: `<base>:<granularity>:<shard_epoch>:<series>`
//!
//! Examples:
//! - `stats:1minute:1500213600:page.views` (buckets of one hour)
//! - `stats:1day:1499990400:signups` (buckets of one 7-day window)
//!
//! The shard epoch is the bucket rounded to the granularity's `ttl`, so a
//! key only ever holds buckets from one retention window. Inside the key's
//! hash, each field is a bucket epoch in decimal.
//!
//! Components are joined with `:` and never escaped. Base keys and
//! granularity names must not contain the separator; series names may, since
//! the series is always the last component.

use super::granularity::Granularity;
use super::time::{round_epoch, round_time};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

pub const SEPARATOR: char = ':';

/// Components of a decoded shard key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardKey {
    pub granularity: String,
    pub shard_epoch: i64,
    pub series: String,
}

/// Encodes and decodes shard keys for one base key and timezone
#[derive(Debug, Clone, PartialEq)]
pub struct ShardKeyEncoder {
    base_key: String,
    timezone: Option<Tz>,
}

impl ShardKeyEncoder {
    pub fn new(base_key: impl Into<String>, timezone: Option<Tz>) -> Self {
        ShardKeyEncoder {
            base_key: base_key.into(),
            timezone,
        }
    }

    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    /// Shard epoch of a bucket: the bucket rounded to the retention window
    pub fn shard_epoch(&self, granularity: &Granularity, bucket_epoch: i64) -> i64 {
        round_epoch(bucket_epoch, granularity.ttl, self.timezone)
    }

    /// Key holding `bucket_epoch` of `series`
    ///
    /// Format: `<base>:<granularity>:<shard_epoch>:<series>`
    pub fn encode(&self, series: &str, granularity: &Granularity, bucket_epoch: i64) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.base_key,
            granularity.name,
            self.shard_epoch(granularity, bucket_epoch),
            series,
            sep = SEPARATOR
        )
    }

    /// Glob pattern matching every series like `search` in the bucket's shard
    ///
    /// Returns: `<base>:<granularity>:<shard_epoch>:<search>`
    pub fn pattern(&self, search: &str, granularity: &Granularity, bucket_epoch: i64) -> String {
        self.encode(search, granularity, bucket_epoch)
    }

    /// Key with an empty series component, stripped from listed keys to
    /// recover series names
    ///
    /// Returns: `<base>:<granularity>:<shard_epoch>:`
    pub fn prefix(&self, granularity: &Granularity, bucket_epoch: i64) -> String {
        self.encode("", granularity, bucket_epoch)
    }

    /// Decode a shard key back to its components
    pub fn decode(&self, key: &str) -> Option<ShardKey> {
        let rest = key.strip_prefix(self.base_key.as_str())?.strip_prefix(SEPARATOR)?;
        let mut parts = rest.splitn(3, SEPARATOR);
        let granularity = parts.next().filter(|g| !g.is_empty())?;
        let shard_epoch = parts.next()?.parse::<i64>().ok()?;
        let series = parts.next()?;

        Some(ShardKey {
            granularity: granularity.to_string(),
            shard_epoch,
            series: series.to_string(),
        })
    }

    /// Check if a key belongs to this encoder's base key
    pub fn is_shard_key(&self, key: &str) -> bool {
        self.decode(key).is_some()
    }
}

/// Fully qualified key for `series` at `timestamp` in `granularity`
pub fn derive_shard_key(
    base_key: &str,
    series: &str,
    granularity: &Granularity,
    timestamp: DateTime<Utc>,
    timezone: Option<Tz>,
) -> String {
    let bucket = round_time(timestamp, granularity.duration, timezone);
    ShardKeyEncoder::new(base_key, timezone).encode(series, granularity, bucket)
}

/// Recover a series name from a listed key by removing every matching prefix
/// candidate. Keys are decoded lossily; the result is ambiguous when series
/// names contain the separator or glob characters.
pub fn strip_prefixes(key: &[u8], prefixes: &[String]) -> String {
    let text = String::from_utf8_lossy(key);
    let mut name: &str = &text;
    for prefix in prefixes {
        if let Some(rest) = name.strip_prefix(prefix.as_str()) {
            name = rest;
        }
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::granularity::{days, hours, minutes};
    use chrono::TimeZone;
    use chrono_tz::US::Eastern;

    fn minute() -> Granularity {
        Granularity::new("1minute", minutes(1), hours(1))
    }

    #[test]
    fn test_encode_rounds_to_shard() {
        let encoder = ShardKeyEncoder::new("stats", None);
        // 2017-07-16T12:34:00Z; shard is the enclosing hour
        let key = encoder.encode("page.views", &minute(), 1_500_208_440);
        assert_eq!(key, "stats:1minute:1500206400:page.views");
    }

    #[test]
    fn test_buckets_in_one_window_share_a_key() {
        let encoder = ShardKeyEncoder::new("stats", None);
        let g = minute();
        let first = encoder.encode("s", &g, 1_500_206_400);
        let last = encoder.encode("s", &g, 1_500_206_400 + hours(1) - minutes(1));
        let next = encoder.encode("s", &g, 1_500_206_400 + hours(1));
        assert_eq!(first, last);
        assert_ne!(first, next);
    }

    #[test]
    fn test_derive_shard_key() {
        let g = Granularity::new("1day", days(1), days(7));
        let t = Utc.with_ymd_and_hms(2017, 7, 16, 3, 59, 0).unwrap();

        let utc_key = derive_shard_key("stats", "signups", &g, t, None);
        let local_key = derive_shard_key("stats", "signups", &g, t, Some(Eastern));
        assert!(utc_key.starts_with("stats:1day:"));
        assert!(utc_key.ends_with(":signups"));
        assert_ne!(utc_key, local_key);

        // Local shard boundaries fall on local midnight
        let shard = ShardKeyEncoder::new("stats", Some(Eastern))
            .decode(&local_key)
            .unwrap()
            .shard_epoch;
        let local = Utc.timestamp_opt(shard, 0).unwrap().with_timezone(&Eastern);
        assert_eq!(local.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn test_pattern_and_prefix() {
        let encoder = ShardKeyEncoder::new("tests", None);
        let g = minute();
        assert_eq!(
            encoder.pattern("event:*", &g, 1_500_206_400),
            "tests:1minute:1500206400:event:*"
        );
        assert_eq!(encoder.prefix(&g, 1_500_206_400), "tests:1minute:1500206400:");
    }

    #[test]
    fn test_decode() {
        let encoder = ShardKeyEncoder::new("stats", None);
        let decoded = encoder.decode("stats:1hour:1499990400:event:123").unwrap();
        assert_eq!(decoded.granularity, "1hour");
        assert_eq!(decoded.shard_epoch, 1_499_990_400);
        assert_eq!(decoded.series, "event:123");

        assert!(encoder.decode("other:1hour:1499990400:x").is_none());
        assert!(encoder.decode("stats:1hour:notanumber:x").is_none());
        assert!(encoder.decode("stats:1hour").is_none());
        assert!(encoder.decode("statsx:1hour:1:x").is_none());
        assert!(encoder.is_shard_key("stats:1day:0:"));
    }

    #[test]
    fn test_strip_prefixes() {
        let prefixes = vec![
            "tests:1minute:1500206400:".to_string(),
            "tests:1minute:1500210000:".to_string(),
        ];
        assert_eq!(
            strip_prefixes(b"tests:1minute:1500210000:event:456", &prefixes),
            "event:456"
        );
        assert_eq!(strip_prefixes(b"unrelated", &prefixes), "unrelated");
        assert_eq!(
            strip_prefixes(b"tests:1minute:1500206400:caf\xff", &prefixes),
            "caf\u{fffd}"
        );
    }
}
