//! Fallback-aware repository.
//!
//! Every operation on a [`FallbackRepository`] is first attempted on the
//! wrapped backend handle. When that attempt fails, the repository looks up
//! the fallback configured for its own store, asks the registry for that
//! store's shared repository and re-invokes the identical operation on it.
//! The fallback repository follows the same protocol, so chains A → B → C
//! work without extra wiring.
//!
//! # Loop guard
//!
//! While a repository is dispatching to its fallback it is marked as
//! [`DispatchState::Dispatching`] on the current thread. If the same
//! instance fails again further down the same call stack (for example
//! because A falls back to B and B falls back to A, and the registry hands
//! back the shared instance of A), that inner failure is returned as-is
//! without another lookup. The mark is cleared on every exit from dispatch.
//!
//! The mark is kept per thread, so concurrent callers sharing one repository
//! never see each other's dispatch state.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use cachet_core::{CacheValue, CachetError, CachetResult, Command, Ttl};

use crate::registry::{RegistryInner, StoreRegistry};
use crate::repository::Repository;
use crate::store::Store;
use crate::tagged::TaggedCache;

static NEXT_REPOSITORY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Repositories currently dispatching on this thread.
    static DISPATCHING: RefCell<HashSet<u64>> = RefCell::new(HashSet::new());
}

/// Loop-guard state of a repository on the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching,
}

/// Marks a repository as dispatching until dropped.
struct DispatchGuard {
    id: u64,
}

impl DispatchGuard {
    /// Returns `None` if the repository is already dispatching.
    fn enter(id: u64) -> Option<Self> {
        DISPATCHING
            .with(|active| active.borrow_mut().insert(id))
            .then(|| Self { id })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|active| {
            active.borrow_mut().remove(&self.id);
        });
    }
}

/// Cache repository that retries failed operations on a fallback store.
pub struct FallbackRepository {
    id: u64,
    name: Option<String>,
    repository: Repository,
    registry: Weak<RegistryInner>,
}

impl FallbackRepository {
    pub(crate) fn new(
        handle: Arc<dyn Store>,
        name: Option<String>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            id: NEXT_REPOSITORY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            repository: Repository::new(handle),
            registry,
        }
    }

    /// Name of the store this repository was built for, if known.
    pub fn store_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The wrapped backend handle.
    pub fn handle(&self) -> &Arc<dyn Store> {
        self.repository.store()
    }

    /// The non-fallback repository over the same handle.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// The registry this repository dispatches through, if still alive.
    pub fn registry(&self) -> Option<StoreRegistry> {
        self.registry.upgrade().map(StoreRegistry::from_inner)
    }

    /// Loop-guard state on the calling thread.
    pub fn dispatch_state(&self) -> DispatchState {
        if DISPATCHING.with(|active| active.borrow().contains(&self.id)) {
            DispatchState::Dispatching
        } else {
            DispatchState::Idle
        }
    }

    fn label(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.repository.store().name())
    }

    /// Attempt an operation on the wrapped handle, dispatching to the
    /// fallback store on failure.
    fn guarded<T, A, R>(&self, operation: &'static str, attempt: A, replay: R) -> CachetResult<T>
    where
        A: FnOnce(&Repository) -> CachetResult<T>,
        R: FnOnce(&FallbackRepository) -> CachetResult<T>,
    {
        match attempt(&self.repository) {
            Ok(value) => Ok(value),
            Err(failure) => self.dispatch_fallback(operation, failure, replay),
        }
    }

    /// Re-invoke a failed operation on the fallback store.
    ///
    /// Returns `failure` unchanged when this repository is already
    /// dispatching, has no store name, has no fallback configured, or has
    /// outlived its registry. A fallback store that cannot be built yields
    /// the configuration error instead.
    fn dispatch_fallback<T, R>(
        &self,
        operation: &'static str,
        failure: CachetError,
        replay: R,
    ) -> CachetResult<T>
    where
        R: FnOnce(&FallbackRepository) -> CachetResult<T>,
    {
        let Some(_guard) = DispatchGuard::enter(self.id) else {
            tracing::debug!(
                store = self.label(),
                operation,
                "Fallback already in progress for this repository, re-raising"
            );
            return Err(failure);
        };

        let Some(registry) = self.registry() else {
            return Err(failure);
        };
        let Some(name) = self.name.as_deref() else {
            return Err(failure);
        };
        let Some(fallback) = registry.fallback_for(name) else {
            return Err(failure);
        };

        let target = match registry.store(&fallback) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(
                    store = name,
                    fallback = %fallback,
                    operation,
                    error = %e,
                    "Fallback cache store could not be built"
                );
                return Err(e);
            }
        };

        registry.record_dispatch();
        tracing::warn!(
            store = name,
            fallback = %fallback,
            operation,
            error = %failure,
            "Cache operation failed, retrying on fallback store"
        );

        replay(&target)
    }

    // === Enumerated operations ===

    /// Retrieve a value.
    pub fn get(&self, key: &str) -> CachetResult<Option<CacheValue>> {
        self.guarded("get", |r| r.get(key), |fb| fb.get(key))
    }

    /// Retrieve a value, or `default` if absent.
    pub fn get_or(&self, key: &str, default: impl Into<CacheValue>) -> CachetResult<CacheValue> {
        let default = default.into();
        self.guarded(
            "get",
            |r| r.get_or(key, &default),
            |fb| fb.get_or(key, default.clone()),
        )
    }

    /// Retrieve several values. Every requested key is present in the
    /// result; absent keys map to `None`.
    pub fn many<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> CachetResult<BTreeMap<String, Option<CacheValue>>> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self.guarded("many", |r| r.many(&keys), |fb| fb.many(&keys))
    }

    /// Store a value. `None` stores forever.
    pub fn put(&self, key: &str, value: impl Into<CacheValue>, ttl: Option<Ttl>) -> CachetResult<bool> {
        let value = value.into();
        self.guarded(
            "put",
            |r| r.put(key, &value, ttl),
            |fb| fb.put(key, value.clone(), ttl),
        )
    }

    /// Store several values. `None` stores forever.
    pub fn put_many(
        &self,
        values: &BTreeMap<String, CacheValue>,
        ttl: Option<Ttl>,
    ) -> CachetResult<bool> {
        self.guarded(
            "put_many",
            |r| r.put_many(values, ttl),
            |fb| fb.put_many(values, ttl),
        )
    }

    /// Store a value only if the key is absent.
    pub fn add(&self, key: &str, value: impl Into<CacheValue>, ttl: Option<Ttl>) -> CachetResult<bool> {
        let value = value.into();
        self.guarded(
            "add",
            |r| r.add(key, &value, ttl),
            |fb| fb.add(key, value.clone(), ttl),
        )
    }

    pub fn increment(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.guarded(
            "increment",
            |r| r.increment(key, amount),
            |fb| fb.increment(key, amount),
        )
    }

    pub fn decrement(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.guarded(
            "decrement",
            |r| r.decrement(key, amount),
            |fb| fb.decrement(key, amount),
        )
    }

    /// Store a value with no expiry.
    pub fn forever(&self, key: &str, value: impl Into<CacheValue>) -> CachetResult<bool> {
        let value = value.into();
        self.guarded(
            "forever",
            |r| r.forever(key, &value),
            |fb| fb.forever(key, value.clone()),
        )
    }

    pub fn forget(&self, key: &str) -> CachetResult<bool> {
        self.guarded("forget", |r| r.forget(key), |fb| fb.forget(key))
    }

    /// Remove every value from the store.
    pub fn clear(&self) -> CachetResult<bool> {
        self.guarded("clear", |r| r.clear(), |fb| fb.clear())
    }

    /// Store-level flush. Same effect as [`FallbackRepository::clear`].
    pub fn flush(&self) -> CachetResult<bool> {
        self.guarded("flush", |r| r.clear(), |fb| fb.flush())
    }

    /// Tag-scoped view. Stores without tag support fall back like any other
    /// failure; the returned view is bound to whichever store produced it.
    pub fn tags<K: AsRef<str>>(&self, names: &[K]) -> CachetResult<TaggedCache> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.guarded("tags", |r| r.tags(&names), |fb| fb.tags(&names))
    }

    /// Run a backend-specific command.
    pub fn call(&self, command: &Command) -> CachetResult<CacheValue> {
        self.guarded("call", |r| r.call(command), |fb| fb.call(command))
    }

    // === Composite operations ===
    //
    // Built from the operations above, so each step falls back on its own.

    pub fn has(&self, key: &str) -> CachetResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn missing(&self, key: &str) -> CachetResult<bool> {
        Ok(!self.has(key)?)
    }

    /// Retrieve a value and forget it.
    pub fn pull(&self, key: &str) -> CachetResult<Option<CacheValue>> {
        let value = self.get(key)?;
        self.forget(key)?;
        Ok(value)
    }

    /// Get a value, or compute, store and return it.
    pub fn remember<F>(&self, key: &str, ttl: Option<Ttl>, callback: F) -> CachetResult<CacheValue>
    where
        F: FnOnce() -> CachetResult<CacheValue>,
    {
        if let Some(value) = self.get(key)? {
            return Ok(value);
        }
        let value = callback()?;
        self.put(key, value.clone(), ttl)?;
        Ok(value)
    }

    /// Get a value, or compute, store forever and return it.
    pub fn remember_forever<F>(&self, key: &str, callback: F) -> CachetResult<CacheValue>
    where
        F: FnOnce() -> CachetResult<CacheValue>,
    {
        self.remember(key, None, callback)
    }

    /// Alias of [`FallbackRepository::put`].
    pub fn set(&self, key: &str, value: impl Into<CacheValue>, ttl: Option<Ttl>) -> CachetResult<bool> {
        self.put(key, value, ttl)
    }

    /// Alias of [`FallbackRepository::forget`].
    pub fn delete(&self, key: &str) -> CachetResult<bool> {
        self.forget(key)
    }

    /// Like [`FallbackRepository::many`], with absent keys mapped to `default`.
    pub fn get_multiple<K: AsRef<str>>(
        &self,
        keys: &[K],
        default: impl Into<CacheValue>,
    ) -> CachetResult<BTreeMap<String, CacheValue>> {
        let default = default.into();
        Ok(self
            .many(keys)?
            .into_iter()
            .map(|(key, value)| (key, value.unwrap_or_else(|| default.clone())))
            .collect())
    }

    /// Alias of [`FallbackRepository::put_many`].
    pub fn set_multiple(
        &self,
        values: &BTreeMap<String, CacheValue>,
        ttl: Option<Ttl>,
    ) -> CachetResult<bool> {
        self.put_many(values, ttl)
    }

    /// Forget several keys. True only if every key was removed.
    pub fn delete_multiple<K: AsRef<str>>(&self, keys: &[K]) -> CachetResult<bool> {
        let mut removed = true;
        for key in keys {
            removed &= self.forget(key.as_ref())?;
        }
        Ok(removed)
    }
}

impl fmt::Debug for FallbackRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRepository")
            .field("id", &self.id)
            .field("store", &self.name)
            .field("handle", &self.repository.store().name())
            .finish()
    }
}
