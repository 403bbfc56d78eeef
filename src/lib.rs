pub mod clock;
pub mod store;
pub mod timeseries;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{MemoryStore, SharedStore, Store, StoreCommand, StoreError, StoreValue};
pub use timeseries::{
    Amount, AmountKind, Bucket, Granularity, GranularityTable, TimeSeries, TimeSeriesConfig,
    TimeSeriesError, WriteBatch,
};
