//! Multi-resolution time series counters
//!
//! A `TimeSeries` records amounts against named series at several
//! granularities at once (one minute, one hour, one day...). Each
//! granularity keeps fixed-width buckets for a retention window:
//!
//! ```text
//! increase("page.views", 1)
//!   -> stats:1minute:<hour shard>:page.views  field <minute bucket> += 1
//!   -> stats:1hour:<week shard>:page.views    field <hour bucket>   += 1
//!   -> ...                                    (EXPIRE refreshed on each key)
//! ```
//!
//! Buckets of one retention window share a shard key, so expiry drops a
//! whole window at once and reads never need more than one round trip.
//!
//! ## Usage
//!
//! ```
//! use redis_timeseries::store::MemoryStore;
//! use redis_timeseries::timeseries::{TimeSeries, TimeSeriesConfig};
//!
//! let mut ts = TimeSeries::new(MemoryStore::new(), TimeSeriesConfig::default()).unwrap();
//! ts.increase("page.views", 3, None).unwrap();
//! assert_eq!(ts.get_total("page.views", "1minute", 1, None).unwrap(), 3i64);
//! ```

mod amount;
mod config;
mod engine;
mod error;
mod granularity;
mod key_encoder;
pub mod series_dst;
mod time;

pub use amount::{Amount, AmountKind};
pub use config::{TimeSeriesConfig, ENV_BASE_KEY, ENV_TIMEZONE, ENV_USE_FLOAT};
pub use engine::{Bucket, TimeSeries, WriteBatch, ALL_SERIES};
pub use error::{Result, TimeSeriesError};
pub use granularity::{days, hours, minutes, seconds, Granularity, GranularityTable};
pub use key_encoder::{derive_shard_key, strip_prefixes, ShardKey, ShardKeyEncoder, SEPARATOR};
pub use series_dst::{
    run_series_batch, summarize_series_batch, SeriesDSTConfig, SeriesDSTHarness, SeriesDSTResult,
    SeriesOp, START_EPOCH,
};
pub use time::{bucket_range, is_calendar_aligned, round_epoch, round_time, to_datetime, SECONDS_PER_DAY};
