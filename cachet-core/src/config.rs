//! Configuration types

use crate::{CachetError, CachetResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Environment variable overriding the default store name.
pub const ENV_DEFAULT_STORE: &str = "CACHET_DEFAULT_STORE";

/// Environment variable overriding the key prefix.
pub const ENV_PREFIX: &str = "CACHET_PREFIX";

/// Configuration for a single named store.
///
/// `driver` selects the backend constructor. Any key other than `driver` and
/// `fallback` is passed through to the driver untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub driver: String,
    /// Store to retry against when an operation on this store fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

impl StoreConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            fallback: None,
            options: BTreeMap::new(),
        }
    }

    /// Set the fallback store.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Set a driver option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Read a string driver option.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

/// Store topology: which stores exist, how they are built and where each
/// one falls back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Store used when no name is given.
    pub default: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default)]
    pub stores: BTreeMap<String, StoreConfig>,
}

impl CacheConfig {
    /// Create an empty topology with the given default store name.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            prefix: None,
            stores: BTreeMap::new(),
        }
    }

    /// Add or replace a store definition.
    pub fn with_store(mut self, name: impl Into<String>, store: StoreConfig) -> Self {
        self.stores.insert(name.into(), store);
        self
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> CachetResult<Self> {
        toml::from_str(source).map_err(|e| {
            CachetError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })
    }

    /// Load a TOML file and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> CachetResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CachetError::Config(ConfigError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        let config = Self::from_toml_str(&source)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CACHET_DEFAULT_STORE` and `CACHET_PREFIX` from the process
    /// environment.
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(default) = lookup(ENV_DEFAULT_STORE).filter(|s| !s.is_empty()) {
            self.default = default;
        }
        if let Some(prefix) = lookup(ENV_PREFIX) {
            self.prefix = Some(prefix);
        }
        self
    }

    /// Get a store definition by name.
    pub fn store(&self, name: &str) -> CachetResult<&StoreConfig> {
        self.stores.get(name).ok_or_else(|| {
            CachetError::Config(ConfigError::StoreNotConfigured {
                name: name.to_string(),
            })
        })
    }

    /// The definition handed to the driver of `name`.
    ///
    /// The topology-wide prefix is added as the `prefix` option unless the
    /// store sets its own.
    pub fn driver_config(&self, name: &str) -> CachetResult<StoreConfig> {
        let store = self.store(name)?.clone();
        match &self.prefix {
            Some(prefix) if !store.options.contains_key("prefix") => {
                Ok(store.with_option("prefix", prefix.as_str()))
            }
            _ => Ok(store),
        }
    }

    /// Whether a store with this name is defined.
    pub fn has_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// The fallback configured for `name`, if any.
    pub fn fallback_for(&self, name: &str) -> Option<&str> {
        self.stores.get(name).and_then(|s| s.fallback.as_deref())
    }

    /// Validate the topology.
    ///
    /// Validates:
    /// - the default store is defined
    /// - every driver name is non-empty
    /// - every fallback names a defined store
    ///
    /// A store that falls back to itself is accepted; it is logged because
    /// the fallback can never succeed.
    pub fn validate(&self) -> CachetResult<()> {
        if self.default.is_empty() {
            return Err(CachetError::Config(ConfigError::MissingRequired {
                field: "default".to_string(),
            }));
        }

        if !self.stores.contains_key(&self.default) {
            return Err(CachetError::Config(ConfigError::StoreNotConfigured {
                name: self.default.clone(),
            }));
        }

        for (name, store) in &self.stores {
            if store.driver.trim().is_empty() {
                return Err(CachetError::Config(ConfigError::InvalidValue {
                    field: format!("stores.{}.driver", name),
                    value: store.driver.clone(),
                    reason: "driver must not be empty".to_string(),
                }));
            }

            let Some(fallback) = store.fallback.as_deref() else {
                continue;
            };

            if !self.stores.contains_key(fallback) {
                return Err(CachetError::Config(ConfigError::UnknownFallback {
                    store: name.clone(),
                    fallback: fallback.to_string(),
                }));
            }

            if fallback == name {
                tracing::warn!(store = %name, "Cache store falls back to itself");
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TOPOLOGY: &str = r#"
default = "redis"
prefix = "app"

[stores.fallback]
driver = "array"

[stores.redis]
driver = "redis"
connection = "cache"
fallback = "fallback"
port = 6666
"#;

    #[test]
    fn test_from_toml_str() {
        let config = CacheConfig::from_toml_str(TOPOLOGY).unwrap();

        assert_eq!(config.default, "redis");
        assert_eq!(config.prefix.as_deref(), Some("app"));
        assert_eq!(config.stores.len(), 2);

        let redis = config.store("redis").unwrap();
        assert_eq!(redis.driver, "redis");
        assert_eq!(redis.fallback.as_deref(), Some("fallback"));
        assert_eq!(redis.option_str("connection"), Some("cache"));
        assert_eq!(redis.options["port"].as_integer(), Some(6666));
        assert!(!redis.options.contains_key("driver"));
        assert!(!redis.options.contains_key("fallback"));

        config.validate().unwrap();
    }

    #[test]
    fn test_fallback_for() {
        let config = CacheConfig::from_toml_str(TOPOLOGY).unwrap();

        assert_eq!(config.fallback_for("redis"), Some("fallback"));
        assert_eq!(config.fallback_for("fallback"), None);
        assert_eq!(config.fallback_for("unknown"), None);
    }

    #[test]
    fn test_driver_config_merges_prefix() {
        let config = CacheConfig::from_toml_str(TOPOLOGY).unwrap();
        let redis = config.driver_config("redis").unwrap();
        assert_eq!(redis.option_str("prefix"), Some("app"));
        assert_eq!(redis.option_str("connection"), Some("cache"));

        let own = config
            .clone()
            .with_store("own", StoreConfig::new("array").with_option("prefix", "mine"));
        assert_eq!(
            own.driver_config("own").unwrap().option_str("prefix"),
            Some("mine")
        );

        let bare = CacheConfig::new("a").with_store("a", StoreConfig::new("array"));
        assert_eq!(bare.driver_config("a").unwrap().option_str("prefix"), None);
    }

    #[test]
    fn test_parse_error() {
        let err = CacheConfig::from_toml_str("default = ").unwrap_err();
        assert!(matches!(err, CachetError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_store() {
        let config = CacheConfig::new("array").with_store("array", StoreConfig::new("array"));
        let err = config.store("redis").unwrap_err();
        assert_eq!(
            err,
            CachetError::Config(ConfigError::StoreNotConfigured {
                name: "redis".to_string()
            })
        );
    }

    #[test]
    fn test_validate_default_missing() {
        let config = CacheConfig::new("redis").with_store("array", StoreConfig::new("array"));
        assert!(matches!(
            config.validate(),
            Err(CachetError::Config(ConfigError::StoreNotConfigured { .. }))
        ));
    }

    #[test]
    fn test_validate_unknown_fallback() {
        let config = CacheConfig::new("redis")
            .with_store("redis", StoreConfig::new("redis").with_fallback("file"));
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            CachetError::Config(ConfigError::UnknownFallback {
                store: "redis".to_string(),
                fallback: "file".to_string(),
            })
        );
    }

    #[test]
    fn test_validate_empty_driver() {
        let config = CacheConfig::new("redis").with_store("redis", StoreConfig::new(" "));
        assert!(matches!(
            config.validate(),
            Err(CachetError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_validate_accepts_cycles() {
        let config = CacheConfig::new("redisA")
            .with_store("redisA", StoreConfig::new("redis").with_fallback("redisB"))
            .with_store("redisB", StoreConfig::new("redis").with_fallback("redisA"))
            .with_store("self", StoreConfig::new("redis").with_fallback("self"));
        config.validate().unwrap();
    }

    #[test]
    fn test_apply_overrides_from() {
        let config = CacheConfig::from_toml_str(TOPOLOGY)
            .unwrap()
            .apply_overrides_from(|key| match key {
                ENV_DEFAULT_STORE => Some("fallback".to_string()),
                ENV_PREFIX => Some("other".to_string()),
                _ => None,
            });

        assert_eq!(config.default, "fallback");
        assert_eq!(config.prefix.as_deref(), Some("other"));
    }

    #[test]
    fn test_apply_overrides_ignores_empty_default() {
        let config = CacheConfig::from_toml_str(TOPOLOGY)
            .unwrap()
            .apply_overrides_from(|key| (key == ENV_DEFAULT_STORE).then(String::new));
        assert_eq!(config.default, "redis");
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TOPOLOGY.as_bytes()).unwrap();

        let config = CacheConfig::from_path(file.path()).unwrap();
        assert_eq!(config.default, "redis");
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CacheConfig::from_path(dir.path().join("cache.toml")).unwrap_err();
        assert!(matches!(err, CachetError::Config(ConfigError::Io { .. })));
    }

    #[test]
    fn test_builder_roundtrip_through_toml() {
        let config = CacheConfig::new("redis")
            .with_prefix("app")
            .with_store("fallback", StoreConfig::new("array"))
            .with_store(
                "redis",
                StoreConfig::new("redis")
                    .with_fallback("fallback")
                    .with_option("connection", "cache"),
            );

        let rendered = toml::to_string(&config).unwrap();
        let parsed = CacheConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
