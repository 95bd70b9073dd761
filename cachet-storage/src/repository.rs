//! Plain cache repository.
//!
//! [`Repository`] is the non-fallback layer over a backend handle. It turns
//! TTLs into store calls, applies defaults and builds tag-scoped views. The
//! fallback repository delegates its first attempt of every operation here.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cachet_core::{CacheValue, CachetResult, Command, StoreError, Ttl};

use crate::store::Store;
use crate::tagged::TaggedCache;

/// Cache repository over a single backend handle.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The wrapped backend handle.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn get(&self, key: &str) -> CachetResult<Option<CacheValue>> {
        self.store.get(key)
    }

    /// Get a value, or `default` if absent.
    pub fn get_or(&self, key: &str, default: &CacheValue) -> CachetResult<CacheValue> {
        Ok(self.store.get(key)?.unwrap_or_else(|| default.clone()))
    }

    pub fn many<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> CachetResult<BTreeMap<String, Option<CacheValue>>> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self.store.many(&keys)
    }

    /// Store a value.
    ///
    /// Without a TTL the value is stored forever. A TTL of zero or fewer
    /// seconds forgets the key instead.
    pub fn put(&self, key: &str, value: &CacheValue, ttl: Option<Ttl>) -> CachetResult<bool> {
        let Some(ttl) = ttl else {
            return self.store.forever(key, value);
        };

        let seconds = ttl.seconds();
        if seconds <= 0 {
            return self.store.forget(key);
        }
        self.store.put(key, value, seconds)
    }

    /// Store several values. Same TTL rules as [`Repository::put`].
    pub fn put_many(
        &self,
        values: &BTreeMap<String, CacheValue>,
        ttl: Option<Ttl>,
    ) -> CachetResult<bool> {
        let Some(ttl) = ttl else {
            let mut stored = true;
            for (key, value) in values {
                stored &= self.store.forever(key, value)?;
            }
            return Ok(stored);
        };

        let seconds = ttl.seconds();
        if seconds <= 0 {
            let mut removed = true;
            for key in values.keys() {
                removed &= self.store.forget(key)?;
            }
            return Ok(removed);
        }
        self.store.put_many(values, seconds)
    }

    /// Store a value only if the key is absent.
    ///
    /// An already-expired TTL never stores anything.
    pub fn add(&self, key: &str, value: &CacheValue, ttl: Option<Ttl>) -> CachetResult<bool> {
        match ttl {
            Some(ttl) => {
                let seconds = ttl.seconds();
                if seconds <= 0 {
                    return Ok(false);
                }
                self.store.add(key, value, seconds)
            }
            None => {
                if self.store.get(key)?.is_some() {
                    return Ok(false);
                }
                self.store.forever(key, value)
            }
        }
    }

    pub fn increment(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.store.increment(key, amount)
    }

    pub fn decrement(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.store.decrement(key, amount)
    }

    pub fn forever(&self, key: &str, value: &CacheValue) -> CachetResult<bool> {
        self.store.forever(key, value)
    }

    pub fn forget(&self, key: &str) -> CachetResult<bool> {
        self.store.forget(key)
    }

    /// Remove every value from the store.
    pub fn clear(&self) -> CachetResult<bool> {
        self.store.flush()
    }

    pub fn has(&self, key: &str) -> CachetResult<bool> {
        Ok(self.store.get(key)?.is_some())
    }

    /// Build a tag-scoped view over this repository's store.
    pub fn tags<K: AsRef<str>>(&self, names: &[K]) -> CachetResult<TaggedCache> {
        if !self.store.supports_tags() {
            return Err(StoreError::Unsupported {
                store: self.store.name().to_string(),
                operation: "tags".to_string(),
            }
            .into());
        }
        let names = names.iter().map(|n| n.as_ref().to_string()).collect();
        Ok(TaggedCache::new(self.clone(), names))
    }

    pub fn call(&self, command: &Command) -> CachetResult<CacheValue> {
        self.store.call(command)
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.store.name())
            .finish()
    }
}
