//! In-process hash store with per-key expiry.
//!
//! Implements the subset of Redis semantics the time series engine relies
//! on: hash field increments, EXPIRE, HGET and glob KEYS. A grouped
//! submission is applied as one unit: if any command fails, every key the
//! group touched is restored to its previous state.
//!
//! # Invariants
//!
//! - Every key in `expirations` is also in `data`
//! - Empty hashes are never stored
//! - Expired keys are invisible to every command, evicted lazily on access

use super::{glob_match, Store, StoreCommand, StoreError, StoreValue};
use crate::clock::{Clock, SystemClock};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

type Hash = AHashMap<String, String>;

/// Snapshot of one key taken before the first mutation of a group
struct Undo {
    key: String,
    data: Option<Hash>,
    expiration: Option<i64>,
}

pub struct MemoryStore {
    data: AHashMap<String, Hash>,
    /// Absolute expiry instants, milliseconds since the Unix epoch
    expirations: AHashMap<String, i64>,
    clock: Arc<dyn Clock>,
    commands_processed: usize,
    groups_processed: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        MemoryStore {
            data: AHashMap::new(),
            expirations: AHashMap::new(),
            clock: Arc::new(clock),
            commands_processed: 0,
            groups_processed: 0,
        }
    }

    fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    fn is_expired(&self, key: &str, now: i64) -> bool {
        self.expirations.get(key).is_some_and(|&at| at <= now)
    }

    fn remove_key(&mut self, key: &str) {
        self.data.remove(key);
        self.expirations.remove(key);
    }

    /// Drop a key if its lifetime has run out
    fn expire_if_needed(&mut self, key: &str, now: i64) {
        if self.is_expired(key, now) {
            trace!(key, "evicting expired key");
            self.remove_key(key);
        }
    }

    /// Remove every expired key, returning how many were evicted
    pub fn evict_expired(&mut self) -> usize {
        let now = self.now_millis();
        let expired: Vec<String> = self
            .expirations
            .iter()
            .filter(|(_, &at)| at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let count = expired.len();
        for key in expired {
            self.remove_key(&key);
        }

        debug_assert!(
            self.expirations.keys().all(|k| self.data.contains_key(k)),
            "Invariant violated: expiration without data"
        );
        count
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.now_millis();
        self.data.keys().filter(|k| !self.is_expired(k, now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.now_millis();
        self.data.contains_key(key) && !self.is_expired(key, now)
    }

    /// Remaining lifetime in seconds: -2 if the key does not exist, -1 if it
    /// has no expiry
    pub fn ttl(&self, key: &str) -> i64 {
        let now = self.now_millis();
        if !self.data.contains_key(key) || self.is_expired(key, now) {
            return -2;
        }
        match self.expirations.get(key) {
            Some(&at) => ((at - now) / 1000).max(0),
            None => -1,
        }
    }

    /// Field/value pairs of a live hash, sorted by field
    pub fn hash_fields(&self, key: &str) -> Vec<(String, String)> {
        let now = self.now_millis();
        if self.is_expired(key, now) {
            return Vec::new();
        }
        let mut fields: Vec<(String, String)> = self
            .data
            .get(key)
            .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default();
        fields.sort();
        fields
    }

    pub fn flush(&mut self) {
        self.data.clear();
        self.expirations.clear();
    }

    pub fn commands_processed(&self) -> usize {
        self.commands_processed
    }

    /// Number of grouped submissions, i.e. round trips
    pub fn groups_processed(&self) -> usize {
        self.groups_processed
    }

    fn snapshot(&self, key: &str, undo: &mut Vec<Undo>) {
        if undo.iter().any(|u| u.key == key) {
            return;
        }
        undo.push(Undo {
            key: key.to_string(),
            data: self.data.get(key).cloned(),
            expiration: self.expirations.get(key).copied(),
        });
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry.data {
                Some(hash) => {
                    self.data.insert(entry.key.clone(), hash);
                }
                None => {
                    self.data.remove(&entry.key);
                }
            }
            match entry.expiration {
                Some(at) => {
                    self.expirations.insert(entry.key, at);
                }
                None => {
                    self.expirations.remove(&entry.key);
                }
            }
        }
    }

    fn execute(
        &mut self,
        cmd: &StoreCommand,
        now: i64,
        undo: &mut Vec<Undo>,
    ) -> Result<StoreValue, StoreError> {
        self.commands_processed += 1;

        match cmd {
            StoreCommand::HIncrBy {
                key,
                field,
                increment,
            } => {
                self.expire_if_needed(key, now);
                let current = match self.data.get(key).and_then(|h| h.get(field)) {
                    Some(v) => v
                        .parse::<i64>()
                        .map_err(|_| StoreError::NotANumber(format!("{}/{}", key, field)))?,
                    None => 0,
                };
                let new_value = current
                    .checked_add(*increment)
                    .ok_or(StoreError::Overflow)?;

                self.snapshot(key, undo);
                self.data
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), new_value.to_string());
                Ok(StoreValue::Integer(new_value))
            }
            StoreCommand::HIncrByFloat {
                key,
                field,
                increment,
            } => {
                self.expire_if_needed(key, now);
                let current = match self.data.get(key).and_then(|h| h.get(field)) {
                    Some(v) => v
                        .parse::<f64>()
                        .map_err(|_| StoreError::NotANumber(format!("{}/{}", key, field)))?,
                    None => 0.0,
                };
                let new_value = current + increment;
                if !new_value.is_finite() {
                    return Err(StoreError::NotANumber(format!("{}/{}", key, field)));
                }

                let text = new_value.to_string();
                self.snapshot(key, undo);
                self.data
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), text.clone());
                Ok(StoreValue::Bulk(text.into_bytes()))
            }
            StoreCommand::Expire { key, seconds } => {
                self.expire_if_needed(key, now);
                if !self.data.contains_key(key) {
                    return Ok(StoreValue::Integer(0));
                }
                self.snapshot(key, undo);
                if *seconds <= 0 {
                    // Non-positive TTL deletes the key immediately
                    self.remove_key(key);
                } else {
                    let at = now.saturating_add(seconds.saturating_mul(1000));
                    self.expirations.insert(key.clone(), at);
                }
                Ok(StoreValue::Integer(1))
            }
            StoreCommand::HGet { key, field } => {
                self.expire_if_needed(key, now);
                Ok(match self.data.get(key).and_then(|h| h.get(field)) {
                    Some(v) => StoreValue::Bulk(v.as_bytes().to_vec()),
                    None => StoreValue::Nil,
                })
            }
            StoreCommand::Keys { pattern } => {
                let mut keys: Vec<&String> = self
                    .data
                    .keys()
                    .filter(|k| !self.is_expired(k, now) && glob_match(pattern, k))
                    .collect();
                keys.sort();
                Ok(StoreValue::Array(
                    keys.into_iter()
                        .map(|k| StoreValue::Bulk(k.as_bytes().to_vec()))
                        .collect(),
                ))
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.data.len())
            .field("expirations", &self.expirations.len())
            .field("commands_processed", &self.commands_processed)
            .field("groups_processed", &self.groups_processed)
            .finish()
    }
}

impl Store for MemoryStore {
    fn execute_grouped(&mut self, commands: &[StoreCommand]) -> Result<Vec<StoreValue>, StoreError> {
        // One instant for the whole group so expiry cannot change mid-batch
        let now = self.now_millis();
        self.groups_processed += 1;
        let mut undo = Vec::new();
        let mut replies = Vec::with_capacity(commands.len());

        for cmd in commands {
            match self.execute(cmd, now, &mut undo) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    self.rollback(undo);
                    return Err(e);
                }
            }
        }

        debug_assert_eq!(
            replies.len(),
            commands.len(),
            "Postcondition violated: one reply per command"
        );
        Ok(replies)
    }
}

/// Cloneable handle to one `MemoryStore`, so several engines can share it.
/// Each group runs under the write lock.
#[derive(Clone, Debug)]
pub struct SharedStore {
    inner: Arc<RwLock<MemoryStore>>,
}

impl SharedStore {
    pub fn new(store: MemoryStore) -> Self {
        SharedStore {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn with_lock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut MemoryStore) -> R,
    {
        let mut store = self.inner.write();
        f(&mut store)
    }

    pub fn ttl(&self, key: &str) -> i64 {
        self.inner.read().ttl(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn groups_processed(&self) -> usize {
        self.inner.read().groups_processed()
    }
}

impl Store for SharedStore {
    fn execute_grouped(&mut self, commands: &[StoreCommand]) -> Result<Vec<StoreValue>, StoreError> {
        self.with_lock(|store| store.execute_grouped(commands))
    }
}
