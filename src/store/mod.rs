//! Key/value store collaborator
//!
//! The time series engine only needs a handful of hash and key commands from
//! its backing store, always submitted as one atomic group:
//!
//! - `HINCRBY` / `HINCRBYFLOAT`: accumulate an amount in a bucket field
//! - `EXPIRE`: refresh the lifetime of a shard key
//! - `HGET`: read one bucket back
//! - `KEYS`: glob listing used for series discovery
//!
//! Implementations:
//! - `MemoryStore`: in-process store with expiry and glob matching
//! - `SharedStore`: cloneable `Arc<RwLock<MemoryStore>>` handle
//! - `RedisStore`: real Redis server via MULTI/EXEC pipelines (feature `redis-store`)

mod glob;
mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

pub use glob::glob_match;
pub use memory::{MemoryStore, SharedStore};
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

use thiserror::Error;

/// A single command understood by the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    /// HINCRBY key field increment
    HIncrBy {
        key: String,
        field: String,
        increment: i64,
    },
    /// HINCRBYFLOAT key field increment
    HIncrByFloat {
        key: String,
        field: String,
        increment: f64,
    },
    /// EXPIRE key seconds
    Expire { key: String, seconds: i64 },
    /// HGET key field
    HGet { key: String, field: String },
    /// KEYS pattern
    Keys { pattern: String },
}

impl StoreCommand {
    /// Command name as sent on the wire
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::HIncrBy { .. } => "HINCRBY",
            StoreCommand::HIncrByFloat { .. } => "HINCRBYFLOAT",
            StoreCommand::Expire { .. } => "EXPIRE",
            StoreCommand::HGet { .. } => "HGET",
            StoreCommand::Keys { .. } => "KEYS",
        }
    }

    /// The key (or pattern) this command addresses
    pub fn key(&self) -> &str {
        match self {
            StoreCommand::HIncrBy { key, .. }
            | StoreCommand::HIncrByFloat { key, .. }
            | StoreCommand::Expire { key, .. }
            | StoreCommand::HGet { key, .. } => key,
            StoreCommand::Keys { pattern } => pattern,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, StoreCommand::HGet { .. } | StoreCommand::Keys { .. })
    }
}

/// Raw reply from the store, one per submitted command
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Nil,
    Integer(i64),
    Bulk(Vec<u8>),
    Status(String),
    Array(Vec<StoreValue>),
}

impl StoreValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, StoreValue::Nil)
    }

    /// Decode a bulk or status reply as text
    pub fn as_text(&self) -> Option<String> {
        match self {
            StoreValue::Bulk(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            StoreValue::Status(s) => Some(s.clone()),
            StoreValue::Integer(i) => Some(i.to_string()),
            StoreValue::Nil | StoreValue::Array(_) => None,
        }
    }
}

/// Failure reported by a store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reply or request the store could not make sense of
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Hash field does not hold a number of the requested kind, or the
    /// increment would produce NaN or infinity
    #[error("hash value at '{0}' is not a valid number")]
    NotANumber(String),
    /// Integer increment overflowed
    #[error("increment or decrement would overflow")]
    Overflow,
    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Capability set the time series engine requires from its store.
///
/// `execute_grouped` is the only required method: every command in the
/// slice is applied as one unit and the replies come back in submission
/// order. The single-command helpers are thin wrappers over it.
pub trait Store {
    fn execute_grouped(&mut self, commands: &[StoreCommand]) -> Result<Vec<StoreValue>, StoreError>;

    fn hash_increment(&mut self, key: &str, field: &str, amount: i64) -> Result<i64, StoreError> {
        let reply = self.execute_single(StoreCommand::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            increment: amount,
        })?;
        match reply {
            StoreValue::Integer(n) => Ok(n),
            other => Err(StoreError::Protocol(format!(
                "HINCRBY returned {:?}",
                other
            ))),
        }
    }

    fn hash_increment_float(
        &mut self,
        key: &str,
        field: &str,
        amount: f64,
    ) -> Result<f64, StoreError> {
        let reply = self.execute_single(StoreCommand::HIncrByFloat {
            key: key.to_string(),
            field: field.to_string(),
            increment: amount,
        })?;
        reply
            .as_text()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| StoreError::Protocol(format!("HINCRBYFLOAT returned {:?}", reply)))
    }

    /// Returns true if the key existed and its lifetime was reset
    fn set_expiry(&mut self, key: &str, ttl_seconds: i64) -> Result<bool, StoreError> {
        let reply = self.execute_single(StoreCommand::Expire {
            key: key.to_string(),
            seconds: ttl_seconds,
        })?;
        Ok(matches!(reply, StoreValue::Integer(1)))
    }

    fn hash_get(&mut self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let reply = self.execute_single(StoreCommand::HGet {
            key: key.to_string(),
            field: field.to_string(),
        })?;
        match reply {
            StoreValue::Nil => Ok(None),
            StoreValue::Bulk(bytes) => Ok(Some(bytes)),
            other => Err(StoreError::Protocol(format!("HGET returned {:?}", other))),
        }
    }

    fn list_keys(&mut self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let reply = self.execute_single(StoreCommand::Keys {
            pattern: pattern.to_string(),
        })?;
        match reply {
            StoreValue::Array(items) => Ok(items.iter().filter_map(StoreValue::as_text).collect()),
            StoreValue::Nil => Ok(Vec::new()),
            other => Err(StoreError::Protocol(format!("KEYS returned {:?}", other))),
        }
    }

    #[doc(hidden)]
    fn execute_single(&mut self, command: StoreCommand) -> Result<StoreValue, StoreError> {
        let mut replies = self.execute_grouped(std::slice::from_ref(&command))?;
        replies
            .pop()
            .ok_or_else(|| StoreError::Protocol(format!("no reply for {}", command.name())))
    }
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn execute_grouped(&mut self, commands: &[StoreCommand]) -> Result<Vec<StoreValue>, StoreError> {
        (**self).execute_grouped(commands)
    }
}
