//! Configuration for the time series engine
//!
//! Settings can come from code (builders), a TOML document or environment
//! variables:
//!
//! ```toml
//! base_key = "stats"
//! use_float = false
//! timezone = "US/Eastern"
//!
//! [[granularities]]
//! name = "1minute"
//! duration = 60
//! ttl = 3600
//! ```

use super::amount::AmountKind;
use super::error::{Result, TimeSeriesError};
use super::granularity::{Granularity, GranularityTable};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const ENV_BASE_KEY: &str = "TIMESERIES_BASE_KEY";
pub const ENV_USE_FLOAT: &str = "TIMESERIES_USE_FLOAT";
pub const ENV_TIMEZONE: &str = "TIMESERIES_TIMEZONE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesConfig {
    /// Prefix of every shard key (default: stats)
    pub base_key: String,
    /// Float amounts via HINCRBYFLOAT instead of integer HINCRBY
    pub use_float: bool,
    /// IANA timezone name; enables local-midnight day buckets
    pub timezone: Option<String>,
    /// Replaces the default granularity table when set
    pub granularities: Option<Vec<Granularity>>,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        TimeSeriesConfig {
            base_key: "stats".to_string(),
            use_float: false,
            timezone: None,
            granularities: None,
        }
    }
}

impl TimeSeriesConfig {
    /// Create config for testing
    pub fn test() -> Self {
        TimeSeriesConfig {
            base_key: "tests".to_string(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: TimeSeriesConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults. The granularity table can only
    /// be overridden in code or TOML.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `from_env` over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TimeSeriesConfig::default();
        TimeSeriesConfig {
            base_key: lookup(ENV_BASE_KEY)
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.base_key),
            use_float: lookup(ENV_USE_FLOAT)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.use_float),
            timezone: lookup(ENV_TIMEZONE).filter(|s| !s.is_empty()),
            granularities: None,
        }
    }

    pub fn with_base_key(mut self, base_key: impl Into<String>) -> Self {
        self.base_key = base_key.into();
        self
    }

    pub fn with_float(mut self, use_float: bool) -> Self {
        self.use_float = use_float;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_granularities(mut self, granularities: Vec<Granularity>) -> Self {
        self.granularities = Some(granularities);
        self
    }

    pub fn amount_kind(&self) -> AmountKind {
        AmountKind::from_use_float(self.use_float)
    }

    pub fn parse_timezone(&self) -> Result<Option<Tz>> {
        match &self.timezone {
            None => Ok(None),
            Some(name) => name
                .parse::<Tz>()
                .map(Some)
                .map_err(|_| TimeSeriesError::Configuration(format!("unknown timezone '{}'", name))),
        }
    }

    pub fn granularity_table(&self) -> Result<GranularityTable> {
        match &self.granularities {
            None => Ok(GranularityTable::default()),
            Some(entries) => GranularityTable::new(entries.clone()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_key.contains(super::key_encoder::SEPARATOR) {
            return Err(TimeSeriesError::Configuration(format!(
                "base key '{}' must not contain '{}'",
                self.base_key,
                super::key_encoder::SEPARATOR
            )));
        }
        self.parse_timezone()?;
        self.granularity_table()?;
        Ok(())
    }
}
