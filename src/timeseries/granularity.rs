//! Granularity table
//!
//! A granularity pairs a bucket `duration` with a retention `ttl`, both in
//! seconds. Buckets of one granularity are grouped into shard keys spanning
//! `ttl` seconds, so `ttl` should be a whole multiple of `duration`.

use super::error::{Result, TimeSeriesError};
use serde::{Deserialize, Serialize};

pub const fn seconds(n: i64) -> i64 {
    n
}

pub const fn minutes(n: i64) -> i64 {
    n * seconds(60)
}

pub const fn hours(n: i64) -> i64 {
    n * minutes(60)
}

pub const fn days(n: i64) -> i64 {
    n * hours(24)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Granularity {
    pub name: String,
    /// Bucket width in seconds
    pub duration: i64,
    /// Retention window in seconds, also the width of one shard key
    pub ttl: i64,
}

impl Granularity {
    pub fn new(name: impl Into<String>, duration: i64, ttl: i64) -> Self {
        Granularity {
            name: name.into(),
            duration,
            ttl,
        }
    }

    /// Largest bucket count a range query may ask for
    pub fn max_count(&self) -> i64 {
        self.ttl / self.duration
    }

    /// Range queries may not reach further back than one retention window
    pub fn check_count(&self, count: usize) -> Result<()> {
        let within = i64::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(self.duration))
            .is_some_and(|span| span <= self.ttl);
        if within {
            Ok(())
        } else {
            Err(TimeSeriesError::Range {
                granularity: self.name.clone(),
                count,
                limit: self.max_count(),
            })
        }
    }
}

/// Ordered, immutable set of granularities owned by one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranularityTable {
    entries: Vec<Granularity>,
}

impl GranularityTable {
    pub fn new(entries: Vec<Granularity>) -> Result<Self> {
        if entries.is_empty() {
            return Err(TimeSeriesError::Configuration(
                "granularity table must not be empty".to_string(),
            ));
        }

        for (i, g) in entries.iter().enumerate() {
            if g.name.is_empty() {
                return Err(TimeSeriesError::Configuration(
                    "granularity name must not be empty".to_string(),
                ));
            }
            if g.duration <= 0 || g.ttl <= 0 {
                return Err(TimeSeriesError::Configuration(format!(
                    "granularity '{}' needs a positive duration and ttl",
                    g.name
                )));
            }
            if g.ttl < g.duration {
                return Err(TimeSeriesError::Configuration(format!(
                    "granularity '{}' has ttl {}s shorter than its duration {}s",
                    g.name, g.ttl, g.duration
                )));
            }
            if entries[..i].iter().any(|other| other.name == g.name) {
                return Err(TimeSeriesError::Configuration(format!(
                    "duplicate granularity '{}'",
                    g.name
                )));
            }
        }

        Ok(GranularityTable { entries })
    }

    pub fn get(&self, name: &str) -> Result<&Granularity> {
        self.entries
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| TimeSeriesError::Configuration(format!("unknown granularity '{}'", name)))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Granularity> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GranularityTable {
    fn default() -> Self {
        GranularityTable {
            entries: vec![
                Granularity::new("1minute", minutes(1), hours(1)),
                Granularity::new("5minute", minutes(5), hours(6)),
                Granularity::new("10minute", minutes(10), hours(12)),
                Granularity::new("1hour", hours(1), days(7)),
                Granularity::new("1day", days(1), days(7)),
            ],
        }
    }
}

impl<'a> IntoIterator for &'a GranularityTable {
    type Item = &'a Granularity;
    type IntoIter = std::slice::Iter<'a, Granularity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(seconds(5), 5);
        assert_eq!(minutes(2), 120);
        assert_eq!(hours(1), 3_600);
        assert_eq!(days(7), 604_800);
    }

    #[test]
    fn test_default_table_order() {
        let table = GranularityTable::default();
        assert_eq!(
            table.names(),
            vec!["1minute", "5minute", "10minute", "1hour", "1day"]
        );
        assert_eq!(table.get("1hour").unwrap().ttl, days(7));
    }

    #[test]
    fn test_unknown_granularity() {
        let table = GranularityTable::default();
        assert!(matches!(
            table.get("1week"),
            Err(TimeSeriesError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_tables() {
        assert!(GranularityTable::new(vec![]).is_err());
        assert!(GranularityTable::new(vec![Granularity::new("1m", 0, 60)]).is_err());
        assert!(GranularityTable::new(vec![Granularity::new("1h", hours(1), minutes(1))]).is_err());
        assert!(GranularityTable::new(vec![
            Granularity::new("1m", 60, 3600),
            Granularity::new("1m", 60, 7200),
        ])
        .is_err());
    }

    #[test]
    fn test_check_count() {
        let g = Granularity::new("1m", minutes(1), hours(1));
        assert_eq!(g.max_count(), 60);
        assert!(g.check_count(0).is_ok());
        assert!(g.check_count(60).is_ok());
        match g.check_count(61) {
            Err(TimeSeriesError::Range { count, limit, .. }) => {
                assert_eq!(count, 61);
                assert_eq!(limit, 60);
            }
            other => panic!("expected range error, got {:?}", other),
        }
        assert!(g.check_count(usize::MAX).is_err());
    }
}
