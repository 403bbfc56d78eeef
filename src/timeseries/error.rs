//! Error types for the time series engine

use crate::store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TimeSeriesError>;

#[derive(Debug, Error)]
pub enum TimeSeriesError {
    /// Unknown granularity, invalid granularity table or timezone
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Range query reaching further back than the retention window
    #[error("count {count} exceeds granularity limit of {limit} for '{granularity}'")]
    Range {
        granularity: String,
        count: usize,
        limit: i64,
    },

    /// Amount not representable in the engine's numeric mode
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Store reply that does not have the expected shape
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    #[error("invalid config file: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TimeSeriesError {
    pub fn is_range(&self) -> bool {
        matches!(self, TimeSeriesError::Range { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, TimeSeriesError::Configuration(_))
    }
}
