//! Store drivers.
//!
//! A driver turns a [`StoreConfig`] into a backend handle. The registry looks
//! drivers up by the `driver` field of each store definition.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cachet_core::{CachetError, CachetResult, ConfigError, StoreConfig};

use crate::store::{MemoryStore, Store};

/// Name of the built-in in-memory driver.
pub const ARRAY_DRIVER: &str = "array";

/// Constructor for backend handles.
pub trait StoreDriver: Send + Sync {
    /// Build the backend for store `name`.
    ///
    /// Errors are reported as configuration errors by the registry.
    fn build(&self, name: &str, config: &StoreConfig) -> CachetResult<Arc<dyn Store>>;
}

impl<F> StoreDriver for F
where
    F: Fn(&str, &StoreConfig) -> CachetResult<Arc<dyn Store>> + Send + Sync,
{
    fn build(&self, name: &str, config: &StoreConfig) -> CachetResult<Arc<dyn Store>> {
        self(name, config)
    }
}

/// Builds [`MemoryStore`] handles. Honors the `prefix` option.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayDriver;

impl StoreDriver for ArrayDriver {
    fn build(&self, name: &str, config: &StoreConfig) -> CachetResult<Arc<dyn Store>> {
        let store = match config.option_str("prefix") {
            Some(prefix) => MemoryStore::new(name).with_prefix(prefix),
            None => MemoryStore::new(name),
        };
        Ok(Arc::new(store))
    }
}

/// Driver lookup table.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn StoreDriver>>,
}

impl DriverRegistry {
    /// A table with no drivers at all.
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Register or replace a driver.
    pub fn register(&mut self, driver: impl Into<String>, factory: impl StoreDriver + 'static) {
        self.drivers.insert(driver.into(), Arc::new(factory));
    }

    /// Builder form of [`DriverRegistry::register`].
    pub fn with(mut self, driver: impl Into<String>, factory: impl StoreDriver + 'static) -> Self {
        self.register(driver, factory);
        self
    }

    pub fn contains(&self, driver: &str) -> bool {
        self.drivers.contains_key(driver)
    }

    /// Registered driver names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the backend for store `name` with the driver it names.
    ///
    /// Driver failures other than configuration errors are reported as
    /// [`ConfigError::InvalidValue`] on the store's `driver` field.
    pub fn build(&self, name: &str, config: &StoreConfig) -> CachetResult<Arc<dyn Store>> {
        let driver = self.drivers.get(&config.driver).ok_or_else(|| {
            CachetError::Config(ConfigError::UnsupportedDriver {
                store: name.to_string(),
                driver: config.driver.clone(),
            })
        })?;

        driver.build(name, config).map_err(|e| match e {
            CachetError::Config(_) => e,
            CachetError::Store(inner) => CachetError::Config(ConfigError::InvalidValue {
                field: format!("stores.{}.driver", name),
                value: config.driver.clone(),
                reason: inner.to_string(),
            }),
        })
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::empty().with(ARRAY_DRIVER, ArrayDriver)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
