//! Cachet Storage - Store Registry and Fallback Repositories
//!
//! Backend handles implement [`Store`]. The [`StoreRegistry`] builds them
//! from configuration through registered drivers and hands out one shared
//! [`FallbackRepository`] per store name. A failed operation on a fallback
//! repository is retried on the store configured as its fallback.

pub mod driver;
pub mod fallback;
pub mod registry;
pub mod repository;
pub mod store;
pub mod tagged;

pub use driver::{ArrayDriver, DriverRegistry, StoreDriver, ARRAY_DRIVER};
pub use fallback::{DispatchState, FallbackRepository};
pub use registry::{RegistryStats, StoreRegistry};
pub use repository::Repository;
pub use store::{MemoryStore, Store, StoreStats};
pub use tagged::{TagSet, TaggedCache};

// Re-export the core types callers need alongside the registry.
pub use cachet_core::{
    CacheConfig, CacheValue, CachetError, CachetResult, Command, ConfigError, StoreConfig,
    StoreError, Ttl,
};
