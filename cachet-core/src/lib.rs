//! Cachet Core - Value, TTL, Error and Configuration Types
//!
//! Pure data structures shared by every Cachet crate. The store registry and
//! the fallback repository live in cachet-storage.

pub mod config;
pub mod error;
pub mod ttl;

pub use config::{CacheConfig, StoreConfig, ENV_DEFAULT_STORE, ENV_PREFIX};
pub use error::{CachetError, CachetResult, ConfigError, StoreError};
pub use ttl::Ttl;

use serde::{Deserialize, Serialize};

// ============================================================================
// VALUE TYPES
// ============================================================================

/// A cached value. Stores hold structured values as-is; nothing here
/// serializes them.
pub type CacheValue = serde_json::Value;

/// A backend primitive outside the enumerated repository surface.
///
/// Stores interpret commands they know and reject the rest with
/// [`StoreError::Unsupported`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<CacheValue>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, value: impl Into<CacheValue>) -> Self {
        self.args.push(value.into());
        self
    }
}
