//! Redis Store Integration Tests
//!
//! Runs the engine against a live server. Needs `--features redis-store`
//! and a Redis instance; set `REDIS_URL` to override `redis://127.0.0.1/9`.
//! Database contents under the `redis_timeseries_tests` base key are
//! overwritten.

#![cfg(feature = "redis-store")]

use redis_timeseries::store::{RedisStore, Store, StoreValue};
use redis_timeseries::timeseries::{days, hours, minutes, Granularity, TimeSeries, TimeSeriesConfig};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/9".to_string())
}

fn engine() -> TimeSeries<RedisStore> {
    let store = RedisStore::open(&redis_url()).unwrap();
    let config = TimeSeriesConfig::default()
        .with_base_key("redis_timeseries_tests")
        .with_granularities(vec![
            Granularity::new("1m", minutes(1), hours(1)),
            Granularity::new("1d", days(1), days(31)),
        ]);
    TimeSeries::new(store, config).unwrap()
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_redis_increase_and_read_back() {
    let mut ts = engine();
    let series = format!("run:{}", std::process::id());
    let now = ts.now();

    ts.increase(&series, 2, Some(now)).unwrap();
    ts.increase(&series, 3, Some(now)).unwrap();
    assert_eq!(ts.get_total(&series, "1m", 1, Some(now)).unwrap(), 5i64);
    assert_eq!(ts.get_total(&series, "1d", 1, Some(now)).unwrap(), 5i64);

    let names = ts.scan_keys("1m", 1, &series, Some(now)).unwrap();
    assert_eq!(names, vec![series.clone()]);
}

#[test]
#[ignore = "requires a running Redis server"]
fn test_redis_batch_replies() {
    let mut ts = engine();
    let series = format!("batch:{}", std::process::id());

    let mut batch = ts.begin_batch();
    ts.queue_increase(&mut batch, &series, 1, None).unwrap();
    let replies = ts.execute(&mut batch).unwrap();

    assert_eq!(replies.len(), 4);
    assert!(matches!(replies[0], StoreValue::Integer(_)));
    assert_eq!(replies[1], StoreValue::Integer(1));

    let key = ts.shard_key(&series, "1m", ts.now()).unwrap();
    assert!(ts.store_mut().set_expiry(&key, 60).unwrap());
}
