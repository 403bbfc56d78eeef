//! Bucket time arithmetic
//!
//! All bucket and shard boundaries are seconds since the Unix epoch.
//!
//! Without a timezone a boundary is a plain floor to a multiple of the
//! precision. With a timezone, precisions that are a whole number of days
//! are calendar aligned: the local date of the instant is floored to a
//! multiple of the day count (counted from 1970-01-01) and the boundary is
//! that date's local midnight. A day bucket therefore always starts at local
//! midnight, and is 23 or 25 hours long across DST changes. Sub-day
//! precisions stay UTC floors even when a timezone is set.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Whether `precision` is rounded on the local calendar when a timezone is set
pub fn is_calendar_aligned(precision: i64) -> bool {
    precision > 0 && precision % SECONDS_PER_DAY == 0
}

/// Round `instant` down to its bucket boundary for `precision` seconds
pub fn round_time(instant: DateTime<Utc>, precision: i64, timezone: Option<Tz>) -> i64 {
    round_epoch(instant.timestamp(), precision, timezone)
}

/// `round_time` on raw epoch seconds
pub fn round_epoch(epoch_secs: i64, precision: i64, timezone: Option<Tz>) -> i64 {
    debug_assert!(precision > 0, "Precondition: precision must be positive");

    match timezone {
        Some(tz) if is_calendar_aligned(precision) => {
            match local_date(epoch_secs, tz) {
                Some(date) => {
                    let days = precision / SECONDS_PER_DAY;
                    let day_number = date.signed_duration_since(NaiveDate::default()).num_days();
                    let start = day_number.div_euclid(days) * days;
                    NaiveDate::default()
                        .checked_add_signed(Duration::days(start))
                        .map(|d| local_midnight(d, tz))
                        .unwrap_or_else(|| floor(epoch_secs, precision))
                }
                None => floor(epoch_secs, precision),
            }
        }
        _ => floor(epoch_secs, precision),
    }
}

/// The `count` bucket boundaries ending with the bucket that contains
/// `anchor_secs`, oldest first. Calendar-aligned buckets step by local
/// calendar days so DST changes never skip or repeat a bucket.
pub fn bucket_range(anchor_secs: i64, precision: i64, count: usize, timezone: Option<Tz>) -> Vec<i64> {
    let anchor = round_epoch(anchor_secs, precision, timezone);
    let steps = (0..count as i64).rev();

    let buckets: Vec<i64> = match timezone {
        Some(tz) if is_calendar_aligned(precision) => {
            let days = precision / SECONDS_PER_DAY;
            match local_date(anchor, tz) {
                Some(anchor_date) => steps
                    .map(|k| {
                        anchor_date
                            .checked_sub_signed(Duration::days(k * days))
                            .map(|d| local_midnight(d, tz))
                            .unwrap_or_else(|| anchor - k * precision)
                    })
                    .collect(),
                None => steps.map(|k| anchor - k * precision).collect(),
            }
        }
        _ => steps.map(|k| anchor - k * precision).collect(),
    };

    debug_assert_eq!(buckets.len(), count, "Postcondition: one boundary per bucket");
    debug_assert!(
        buckets.windows(2).all(|w| w[0] < w[1]),
        "Postcondition: boundaries strictly increasing"
    );
    buckets
}

/// Seconds since the epoch as a UTC datetime
pub fn to_datetime(epoch_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(epoch_secs, 0).single().unwrap_or_default()
}

fn floor(epoch_secs: i64, precision: i64) -> i64 {
    epoch_secs.div_euclid(precision) * precision
}

fn local_date(epoch_secs: i64, tz: Tz) -> Option<NaiveDate> {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .map(|utc| utc.with_timezone(&tz).date_naive())
}

/// First instant of `date` in `tz`. Ambiguous midnights take the earlier
/// instant; a midnight skipped by a DST jump resolves to the first local
/// minute that exists.
fn local_midnight(date: NaiveDate, tz: Tz) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.timestamp(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        LocalResult::None => (1..=24 * 60)
            .find_map(|minute| {
                tz.from_local_datetime(&(midnight + Duration::minutes(minute)))
                    .earliest()
            })
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| midnight.and_utc().timestamp()),
    }
}
