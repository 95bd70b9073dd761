//! Cache backend trait and store statistics.
//!
//! This module defines the primitives every cache backend must provide. The
//! repository layers above translate TTLs and defaults into these calls.

use std::collections::BTreeMap;

use cachet_core::{CacheValue, CachetResult, Command, StoreError};

/// Cache backend trait for pluggable store implementations.
///
/// A store is a single configured backend instance (in-memory map, Redis
/// connection, file directory, ...). Implementations must be thread-safe;
/// the registry hands out one shared handle per store name.
///
/// # Failures
///
/// Any `Err` returned from a primitive is treated by the fallback repository
/// as a backend failure and may be retried on the fallback store.
///
/// # Expiry
///
/// `seconds` arguments are always positive. Writes that would expire
/// immediately never reach the store.
pub trait Store: Send + Sync {
    /// Name of the configured store this backend was built for.
    fn name(&self) -> &str;

    /// Retrieve a value, or `None` if absent or expired.
    fn get(&self, key: &str) -> CachetResult<Option<CacheValue>>;

    /// Retrieve several values. Every requested key is present in the result;
    /// absent keys map to `None`.
    fn many(&self, keys: &[String]) -> CachetResult<BTreeMap<String, Option<CacheValue>>> {
        let mut found = BTreeMap::new();
        for key in keys {
            found.insert(key.clone(), self.get(key)?);
        }
        Ok(found)
    }

    /// Store a value for the given number of seconds.
    fn put(&self, key: &str, value: &CacheValue, seconds: i64) -> CachetResult<bool>;

    /// Store several values for the given number of seconds.
    fn put_many(&self, values: &BTreeMap<String, CacheValue>, seconds: i64) -> CachetResult<bool> {
        let mut stored = true;
        for (key, value) in values {
            stored &= self.put(key, value, seconds)?;
        }
        Ok(stored)
    }

    /// Store a value only if the key does not already hold one.
    ///
    /// The default is not atomic; stores that can do better should override.
    fn add(&self, key: &str, value: &CacheValue, seconds: i64) -> CachetResult<bool> {
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        self.put(key, value, seconds)
    }

    /// Increment an integer value, returning the new value.
    fn increment(&self, key: &str, amount: i64) -> CachetResult<i64>;

    /// Decrement an integer value, returning the new value.
    fn decrement(&self, key: &str, amount: i64) -> CachetResult<i64>;

    /// Store a value with no expiry.
    fn forever(&self, key: &str, value: &CacheValue) -> CachetResult<bool>;

    /// Remove a value.
    fn forget(&self, key: &str) -> CachetResult<bool>;

    /// Remove every value.
    fn flush(&self) -> CachetResult<bool>;

    /// Key prefix configured for this store.
    fn prefix(&self) -> &str {
        ""
    }

    /// Whether tag-scoped views can be built on top of this store.
    fn supports_tags(&self) -> bool {
        true
    }

    /// Execute a backend-specific command.
    fn call(&self, command: &Command) -> CachetResult<CacheValue> {
        Err(StoreError::Unsupported {
            store: self.name().to_string(),
            operation: command.name.clone(),
        }
        .into())
    }
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of reads that found a live value.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of live entries.
    pub entry_count: u64,
    /// Number of entries dropped because they expired.
    pub expirations: u64,
}

impl StoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// Minimal store relying on every default method.
    #[derive(Default)]
    struct MapStore {
        entries: RwLock<HashMap<String, CacheValue>>,
    }

    impl Store for MapStore {
        fn name(&self) -> &str {
            "map"
        }

        fn get(&self, key: &str) -> CachetResult<Option<CacheValue>> {
            Ok(self.entries.read().unwrap().get(key).cloned())
        }

        fn put(&self, key: &str, value: &CacheValue, _seconds: i64) -> CachetResult<bool> {
            self.entries
                .write()
                .unwrap()
                .insert(key.to_string(), value.clone());
            Ok(true)
        }

        fn increment(&self, _key: &str, _amount: i64) -> CachetResult<i64> {
            Ok(0)
        }

        fn decrement(&self, _key: &str, _amount: i64) -> CachetResult<i64> {
            Ok(0)
        }

        fn forever(&self, key: &str, value: &CacheValue) -> CachetResult<bool> {
            self.put(key, value, 0)
        }

        fn forget(&self, key: &str) -> CachetResult<bool> {
            Ok(self.entries.write().unwrap().remove(key).is_some())
        }

        fn flush(&self) -> CachetResult<bool> {
            self.entries.write().unwrap().clear();
            Ok(true)
        }
    }

    #[test]
    fn test_store_stats_hit_rate() {
        let stats = StoreStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = StoreStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_default_many_includes_absent_keys() {
        let store = MapStore::default();
        store.put("a", &CacheValue::from("foo"), 10).unwrap();

        let found = store
            .many(&["a".to_string(), "b".to_string()])
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], Some(CacheValue::from("foo")));
        assert_eq!(found["b"], None);
    }

    #[test]
    fn test_default_put_many_and_add() {
        let store = MapStore::default();
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), CacheValue::from(1));
        values.insert("b".to_string(), CacheValue::from(2));

        assert!(store.put_many(&values, 10).unwrap());
        assert!(!store.add("a", &CacheValue::from(3), 10).unwrap());
        assert!(store.add("c", &CacheValue::from(3), 10).unwrap());
        assert_eq!(store.get("a").unwrap(), Some(CacheValue::from(1)));
        assert_eq!(store.get("c").unwrap(), Some(CacheValue::from(3)));
    }

    #[test]
    fn test_default_call_is_unsupported() {
        let store = MapStore::default();
        let err = store.call(&Command::new("touch")).unwrap_err();
        assert_eq!(
            err,
            StoreError::Unsupported {
                store: "map".to_string(),
                operation: "touch".to_string(),
            }
            .into()
        );
        assert!(store.supports_tags());
        assert_eq!(store.prefix(), "");
    }
}
