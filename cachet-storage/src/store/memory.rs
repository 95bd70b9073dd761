//! In-memory store backing the `array` driver.
//!
//! Values live in a process-local map guarded by a `RwLock`. Expiry is
//! checked lazily on access; expired entries are dropped when touched. The
//! map is private to the handle, so the configured prefix is only reported,
//! never applied to keys.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cachet_core::{CacheValue, CachetResult, Command, StoreError};
use chrono::{DateTime, TimeDelta, Utc};

use super::traits::{Store, StoreStats};

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    expires_at: Option<DateTime<Utc>>,
}

/// Deadline `seconds` from `now`. A lifetime past the representable range
/// means no expiry; one before it means already expired.
fn deadline(now: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    match TimeDelta::try_seconds(seconds).and_then(|d| now.checked_add_signed(d)) {
        Some(at) => Some(at),
        None if seconds <= 0 => Some(now),
        None => None,
    }
}

impl Entry {
    fn new(value: CacheValue, seconds: Option<i64>) -> Self {
        Self {
            value,
            expires_at: seconds.and_then(|s| deadline(Utc::now(), s)),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory cache store.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    prefix: String,
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store for the named configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn read(&self) -> CachetResult<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    fn write(&self) -> CachetResult<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    /// Remove `key` if it has expired. Returns the live entry, if any.
    fn live_entry<'a>(
        &self,
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        entries.get_mut(key)
    }

    fn adjust(&self, key: &str, amount: i64) -> CachetResult<i64> {
        let now = Utc::now();
        let mut entries = self.write()?;

        match self.live_entry(&mut entries, key, now) {
            Some(entry) => {
                let current = entry.value.as_i64().ok_or_else(|| StoreError::NotNumeric {
                    key: key.to_string(),
                })?;
                let next = current.saturating_add(amount);
                entry.value = CacheValue::from(next);
                Ok(next)
            }
            None => {
                entries.insert(key.to_string(), Entry::new(CacheValue::from(amount), None));
                Ok(amount)
            }
        }
    }

    /// Live keys in sorted order.
    pub fn keys(&self) -> CachetResult<Vec<String>> {
        let now = Utc::now();
        let entries = self.read()?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Number of live entries.
    pub fn len(&self) -> CachetResult<usize> {
        let now = Utc::now();
        Ok(self.read()?.values().filter(|e| !e.is_expired(now)).count())
    }

    pub fn is_empty(&self) -> CachetResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reset the expiry of a live entry. Returns false if the key is absent.
    pub fn touch(&self, key: &str, seconds: i64) -> CachetResult<bool> {
        let now = Utc::now();
        let mut entries = self.write()?;
        match self.live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = deadline(now, seconds);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Usage statistics.
    pub fn stats(&self) -> CachetResult<StoreStats> {
        Ok(StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len()? as u64,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }

    fn unsupported(&self, command: &Command) -> StoreError {
        StoreError::Unsupported {
            store: self.name.clone(),
            operation: command.name.clone(),
        }
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get(&self, key: &str) -> CachetResult<Option<CacheValue>> {
        let now = Utc::now();
        let expired = {
            let entries = self.read()?;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.write()?;
            self.live_entry(&mut entries, key, now);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn put(&self, key: &str, value: &CacheValue, seconds: i64) -> CachetResult<bool> {
        let mut entries = self.write()?;
        entries.insert(key.to_string(), Entry::new(value.clone(), Some(seconds)));
        Ok(true)
    }

    fn put_many(&self, values: &BTreeMap<String, CacheValue>, seconds: i64) -> CachetResult<bool> {
        let mut entries = self.write()?;
        for (key, value) in values {
            entries.insert(key.clone(), Entry::new(value.clone(), Some(seconds)));
        }
        Ok(true)
    }

    fn add(&self, key: &str, value: &CacheValue, seconds: i64) -> CachetResult<bool> {
        let now = Utc::now();
        let mut entries = self.write()?;
        if self.live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(value.clone(), Some(seconds)));
        Ok(true)
    }

    fn increment(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.adjust(key, amount)
    }

    fn decrement(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.adjust(key, amount.saturating_neg())
    }

    fn forever(&self, key: &str, value: &CacheValue) -> CachetResult<bool> {
        let mut entries = self.write()?;
        entries.insert(key.to_string(), Entry::new(value.clone(), None));
        Ok(true)
    }

    fn forget(&self, key: &str) -> CachetResult<bool> {
        let mut entries = self.write()?;
        Ok(entries.remove(key).is_some())
    }

    fn flush(&self) -> CachetResult<bool> {
        self.write()?.clear();
        Ok(true)
    }

    /// Supported commands: `count`, `keys` and `touch(key, seconds)`.
    fn call(&self, command: &Command) -> CachetResult<CacheValue> {
        match command.name.as_str() {
            "count" => Ok(CacheValue::from(self.len()? as u64)),
            "keys" => Ok(CacheValue::from(self.keys()?)),
            "touch" => {
                let key = command.args.first().and_then(|v| v.as_str());
                let seconds = command.args.get(1).and_then(|v| v.as_i64());
                match (key, seconds) {
                    (Some(key), Some(seconds)) => Ok(CacheValue::from(self.touch(key, seconds)?)),
                    _ => Err(self.unsupported(command).into()),
                }
            }
            _ => Err(self.unsupported(command).into()),
        }
    }
}
