//! Store registry.
//!
//! Owns one lazily built backend handle per configured store name and one
//! shared [`FallbackRepository`] per store. Handles are cached for the
//! registry's lifetime (or until purged), so identity comparisons on them are
//! stable.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use cachet_core::{CacheConfig, CachetResult, StoreError};

use crate::driver::{DriverRegistry, StoreDriver};
use crate::fallback::FallbackRepository;
use crate::store::Store;

/// Counters describing registry activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Backend handles constructed.
    pub stores_built: u64,
    /// Calls to [`StoreRegistry::resolve`].
    pub resolutions: u64,
    /// Calls to [`StoreRegistry::name_of`].
    pub name_lookups: u64,
    /// Operations re-invoked on a fallback store.
    pub fallback_dispatches: u64,
}

#[derive(Default)]
struct Counters {
    stores_built: AtomicU64,
    resolutions: AtomicU64,
    name_lookups: AtomicU64,
    fallback_dispatches: AtomicU64,
}

pub(crate) struct RegistryInner {
    config: CacheConfig,
    drivers: RwLock<DriverRegistry>,
    handles: RwLock<HashMap<String, Arc<dyn Store>>>,
    repositories: RwLock<HashMap<String, Arc<FallbackRepository>>>,
    counters: Counters,
}

/// Registry of named cache stores.
///
/// Cloning is cheap; clones share the same handles and repositories.
#[derive(Clone)]
pub struct StoreRegistry {
    inner: Arc<RegistryInner>,
}

fn same_handle(a: &Arc<dyn Store>, b: &Arc<dyn Store>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl StoreRegistry {
    /// Create a registry with the built-in drivers.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_drivers(config, DriverRegistry::default())
    }

    /// Create a registry with an explicit driver table.
    pub fn with_drivers(config: CacheConfig, drivers: DriverRegistry) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                drivers: RwLock::new(drivers),
                handles: RwLock::new(HashMap::new()),
                repositories: RwLock::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    /// The store topology this registry was built from.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register a custom driver. Stores already built are unaffected.
    pub fn extend(
        &self,
        driver: impl Into<String>,
        factory: impl StoreDriver + 'static,
    ) -> CachetResult<()> {
        let mut drivers = self
            .inner
            .drivers
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        drivers.register(driver, factory);
        Ok(())
    }

    /// Get the backend handle for `name`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store is not defined, names an
    /// unknown driver, or its driver rejects the definition.
    pub fn resolve(&self, name: &str) -> CachetResult<Arc<dyn Store>> {
        self.inner
            .counters
            .resolutions
            .fetch_add(1, Ordering::Relaxed);

        if let Some(handle) = self
            .inner
            .handles
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(name)
        {
            return Ok(Arc::clone(handle));
        }

        let store_config = self.inner.config.driver_config(name)?;
        let built = self
            .inner
            .drivers
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .build(name, &store_config)?;

        let mut handles = self
            .inner
            .handles
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;

        // Another caller may have built the same store meanwhile; keep theirs.
        if let Some(existing) = handles.get(name) {
            return Ok(Arc::clone(existing));
        }

        tracing::debug!(store = name, driver = %store_config.driver, "Built cache store");
        self.inner
            .counters
            .stores_built
            .fetch_add(1, Ordering::Relaxed);
        handles.insert(name.to_string(), Arc::clone(&built));
        Ok(built)
    }

    /// Wrap a backend handle in a new fallback repository bound to this
    /// registry.
    ///
    /// The repository's store name is captured now, by identity lookup of
    /// `handle` among the handles this registry built. A handle the registry
    /// never built yields a repository without a name, which cannot fall back.
    ///
    /// The result is a new instance with its own loop guard, separate from
    /// the shared one returned by [`StoreRegistry::store`]. A fallback cycle
    /// entered through it stops one hop later, at the shared instance that
    /// is already dispatching, so the caller sees that store's failure.
    pub fn wrap(&self, handle: Arc<dyn Store>) -> FallbackRepository {
        let name = self.handle_name(&handle);
        FallbackRepository::new(handle, name, self.downgrade())
    }

    /// Reverse lookup: the store name of the handle `repository` wraps.
    ///
    /// Compares handle identity, not value equality.
    pub fn name_of(&self, repository: &FallbackRepository) -> Option<String> {
        self.inner
            .counters
            .name_lookups
            .fetch_add(1, Ordering::Relaxed);
        self.handle_name(repository.handle())
    }

    fn handle_name(&self, handle: &Arc<dyn Store>) -> Option<String> {
        let handles = self
            .inner
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        handles
            .iter()
            .find(|(_, h)| same_handle(h, handle))
            .map(|(name, _)| name.clone())
    }

    /// The shared fallback repository for `name`.
    ///
    /// Every call for the same name returns the same instance until the store
    /// is purged.
    pub fn store(&self, name: &str) -> CachetResult<Arc<FallbackRepository>> {
        if let Some(repository) = self
            .inner
            .repositories
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(name)
        {
            return Ok(Arc::clone(repository));
        }

        let handle = self.resolve(name)?;
        let repository = Arc::new(FallbackRepository::new(
            handle,
            Some(name.to_string()),
            self.downgrade(),
        ));

        let mut repositories = self
            .inner
            .repositories
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        Ok(Arc::clone(
            repositories
                .entry(name.to_string())
                .or_insert(repository),
        ))
    }

    /// The shared repository for the configured default store.
    pub fn default_store(&self) -> CachetResult<Arc<FallbackRepository>> {
        self.store(&self.inner.config.default)
    }

    /// Fallback configured for `name`. Read from configuration on every call.
    pub fn fallback_for(&self, name: &str) -> Option<String> {
        self.inner.config.fallback_for(name).map(str::to_string)
    }

    /// Drop the cached handle and repository for `name`.
    ///
    /// Returns whether anything was cached. Repositories already handed out
    /// keep their handle but can no longer be identified by
    /// [`StoreRegistry::name_of`].
    pub fn purge(&self, name: &str) -> CachetResult<bool> {
        let handle = self
            .inner
            .handles
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(name);
        let repository = self
            .inner
            .repositories
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(name);
        Ok(handle.is_some() || repository.is_some())
    }

    /// Names of the stores built so far, sorted.
    pub fn built_stores(&self) -> Vec<String> {
        let handles = self
            .inner
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = handles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> RegistryStats {
        let c = &self.inner.counters;
        RegistryStats {
            stores_built: c.stores_built.load(Ordering::Relaxed),
            resolutions: c.resolutions.load(Ordering::Relaxed),
            name_lookups: c.name_lookups.load(Ordering::Relaxed),
            fallback_dispatches: c.fallback_dispatches.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_dispatch(&self) {
        self.inner
            .counters
            .fallback_dispatches
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("default", &self.inner.config.default)
            .field("built", &self.built_stores())
            .finish()
    }
}
