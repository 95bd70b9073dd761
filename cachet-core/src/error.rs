//! Error types for Cachet operations

use thiserror::Error;

/// Failures raised by a cache backend while executing a primitive.
///
/// These are the errors the fallback repository reacts to. They are returned
/// to callers unchanged when no fallback can take over.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store {store} is unavailable: {reason}")]
    Unavailable { store: String, reason: String },

    #[error("Store {store} timed out after {elapsed_ms}ms")]
    Timeout { store: String, elapsed_ms: u64 },

    #[error("Serialization failed in store {store}: {reason}")]
    Serialization { store: String, reason: String },

    #[error("Value stored under {key} is not an integer")]
    NotNumeric { key: String },

    #[error("Store {store} does not support {operation}")]
    Unsupported { store: String, operation: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
///
/// Raised when the store topology is invalid or a store cannot be built.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cache store [{name}] is not defined")]
    StoreNotConfigured { name: String },

    #[error("Driver [{driver}] for store [{store}] is not supported")]
    UnsupportedDriver { store: String, driver: String },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Store [{store}] falls back to undefined store [{fallback}]")]
    UnknownFallback { store: String, fallback: String },

    #[error("Failed to parse cache configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read cache configuration {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Master error type for all Cachet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CachetError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CachetError {
    /// Whether this error came from a backend primitive.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, CachetError::Store(_))
    }

    /// Whether this error came from the store topology or a store constructor.
    pub fn is_config_error(&self) -> bool {
        matches!(self, CachetError::Config(_))
    }
}

/// Result type alias for Cachet operations.
pub type CachetResult<T> = Result<T, CachetError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_unavailable() {
        let err = StoreError::Unavailable {
            store: "redis".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("redis"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_store_error_display_timeout() {
        let err = StoreError::Timeout {
            store: "redis".to_string(),
            elapsed_ms: 250,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("250"));
    }

    #[test]
    fn test_config_error_display_unsupported_driver() {
        let err = ConfigError::UnsupportedDriver {
            store: "primary".to_string(),
            driver: "memcached".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("memcached"));
        assert!(msg.contains("primary"));
    }

    #[test]
    fn test_config_error_display_unknown_fallback() {
        let err = ConfigError::UnknownFallback {
            store: "redis".to_string(),
            fallback: "file".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("[redis]"));
        assert!(msg.contains("[file]"));
    }

    #[test]
    fn test_cachet_error_from_variants() {
        let store = CachetError::from(StoreError::LockPoisoned);
        assert!(matches!(store, CachetError::Store(_)));
        assert!(store.is_store_failure());
        assert!(!store.is_config_error());

        let config = CachetError::from(ConfigError::StoreNotConfigured {
            name: "missing".to_string(),
        });
        assert!(matches!(config, CachetError::Config(_)));
        assert!(config.is_config_error());
    }
}
