//! Cachet Test Utilities
//!
//! Shared test infrastructure for the Cachet workspace:
//! - Stores and drivers that fail or record every call
//! - Config fixtures for the usual fallback topologies
//! - Proptest generators for keys, values and TTLs
//! - Custom assertions on `CachetResult`
//! - One-time tracing setup for tests

// Re-export storage and core types for convenience
pub use cachet_storage::{
    CacheConfig, CacheValue, CachetError, CachetResult, Command, ConfigError, DispatchState,
    FallbackRepository, MemoryStore, Store, StoreConfig, StoreDriver, StoreError, StoreRegistry,
    Ttl,
};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: OnceLock<()> = OnceLock::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn` so fallback dispatches show up in
/// failing test output.
pub fn init_test_tracing() {
    TRACING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// OPERATION LOG
// ============================================================================

/// Shared, append-only record of `store:operation` entries.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, store: &str, operation: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{}:{}", store, operation));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls recorded against `store`.
    pub fn count_for(&self, store: &str) -> usize {
        let prefix = format!("{}:", store);
        self.entries()
            .iter()
            .filter(|e| e.starts_with(&prefix))
            .count()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ============================================================================
// FAILING STORE
// ============================================================================

/// Driver name for [`UnreachableDriver`].
pub const UNREACHABLE_DRIVER: &str = "unreachable";

/// Driver name for [`RecordingDriver`].
pub const RECORDING_DRIVER: &str = "recording";

/// A store whose backend is never reachable.
///
/// Every primitive fails with [`StoreError::Unavailable`] and is logged.
/// Tag views are refused too, so they fall back like everything else.
#[derive(Debug)]
pub struct UnreachableStore {
    name: String,
    attempts: AtomicUsize,
    log: OperationLog,
}

impl UnreachableStore {
    pub fn new(name: impl Into<String>, log: OperationLog) -> Self {
        Self {
            name: name.into(),
            attempts: AtomicUsize::new(0),
            log,
        }
    }

    /// Calls attempted on this handle.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The error every call on store `name` fails with.
    pub fn failure(name: &str) -> CachetError {
        StoreError::Unavailable {
            store: name.to_string(),
            reason: "connection refused".to_string(),
        }
        .into()
    }

    fn fail<T>(&self, operation: &str) -> CachetResult<T> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.log.record(&self.name, operation);
        Err(Self::failure(&self.name))
    }
}

impl Store for UnreachableStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, _key: &str) -> CachetResult<Option<CacheValue>> {
        self.fail("get")
    }

    fn many(&self, _keys: &[String]) -> CachetResult<BTreeMap<String, Option<CacheValue>>> {
        self.fail("many")
    }

    fn put(&self, _key: &str, _value: &CacheValue, _seconds: i64) -> CachetResult<bool> {
        self.fail("put")
    }

    fn put_many(&self, _values: &BTreeMap<String, CacheValue>, _seconds: i64) -> CachetResult<bool> {
        self.fail("put_many")
    }

    fn add(&self, _key: &str, _value: &CacheValue, _seconds: i64) -> CachetResult<bool> {
        self.fail("add")
    }

    fn increment(&self, _key: &str, _amount: i64) -> CachetResult<i64> {
        self.fail("increment")
    }

    fn decrement(&self, _key: &str, _amount: i64) -> CachetResult<i64> {
        self.fail("decrement")
    }

    fn forever(&self, _key: &str, _value: &CacheValue) -> CachetResult<bool> {
        self.fail("forever")
    }

    fn forget(&self, _key: &str) -> CachetResult<bool> {
        self.fail("forget")
    }

    fn flush(&self) -> CachetResult<bool> {
        self.fail("flush")
    }

    fn supports_tags(&self) -> bool {
        false
    }

    fn call(&self, _command: &Command) -> CachetResult<CacheValue> {
        self.fail("call")
    }
}

/// Builds [`UnreachableStore`] handles that share one [`OperationLog`].
#[derive(Debug, Clone, Default)]
pub struct UnreachableDriver {
    log: OperationLog,
}

impl UnreachableDriver {
    pub fn new(log: OperationLog) -> Self {
        Self { log }
    }
}

impl StoreDriver for UnreachableDriver {
    fn build(&self, name: &str, _config: &StoreConfig) -> CachetResult<Arc<dyn Store>> {
        Ok(Arc::new(UnreachableStore::new(name, self.log.clone())))
    }
}

// ============================================================================
// RECORDING STORE
// ============================================================================

/// A working in-memory store that logs every primitive it serves.
#[derive(Debug)]
pub struct RecordingStore {
    inner: MemoryStore,
    taggable: bool,
    log: OperationLog,
}

impl RecordingStore {
    pub fn new(name: impl Into<String>, log: OperationLog) -> Self {
        Self {
            inner: MemoryStore::new(name),
            taggable: true,
            log,
        }
    }

    /// Refuse tag views.
    pub fn untaggable(mut self) -> Self {
        self.taggable = false;
        self
    }

    fn record(&self, operation: &str) {
        self.log.record(self.inner.name(), operation);
    }
}

impl Store for RecordingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &str) -> CachetResult<Option<CacheValue>> {
        self.record("get");
        self.inner.get(key)
    }

    fn many(&self, keys: &[String]) -> CachetResult<BTreeMap<String, Option<CacheValue>>> {
        self.record("many");
        self.inner.many(keys)
    }

    fn put(&self, key: &str, value: &CacheValue, seconds: i64) -> CachetResult<bool> {
        self.record("put");
        self.inner.put(key, value, seconds)
    }

    fn put_many(&self, values: &BTreeMap<String, CacheValue>, seconds: i64) -> CachetResult<bool> {
        self.record("put_many");
        self.inner.put_many(values, seconds)
    }

    fn add(&self, key: &str, value: &CacheValue, seconds: i64) -> CachetResult<bool> {
        self.record("add");
        self.inner.add(key, value, seconds)
    }

    fn increment(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.record("increment");
        self.inner.increment(key, amount)
    }

    fn decrement(&self, key: &str, amount: i64) -> CachetResult<i64> {
        self.record("decrement");
        self.inner.decrement(key, amount)
    }

    fn forever(&self, key: &str, value: &CacheValue) -> CachetResult<bool> {
        self.record("forever");
        self.inner.forever(key, value)
    }

    fn forget(&self, key: &str) -> CachetResult<bool> {
        self.record("forget");
        self.inner.forget(key)
    }

    fn flush(&self) -> CachetResult<bool> {
        self.record("flush");
        self.inner.flush()
    }

    fn supports_tags(&self) -> bool {
        self.taggable
    }

    fn call(&self, command: &Command) -> CachetResult<CacheValue> {
        self.record("call");
        self.inner.call(command)
    }
}

/// Builds [`RecordingStore`] handles.
///
/// A store definition with `tags = false` gets an untaggable store.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    log: OperationLog,
}

impl RecordingDriver {
    pub fn new(log: OperationLog) -> Self {
        Self { log }
    }
}

impl StoreDriver for RecordingDriver {
    fn build(&self, name: &str, config: &StoreConfig) -> CachetResult<Arc<dyn Store>> {
        let store = RecordingStore::new(name, self.log.clone());
        let taggable = config
            .options
            .get("tags")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if taggable {
            Ok(Arc::new(store))
        } else {
            Ok(Arc::new(store.untaggable()))
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys, values and TTLs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a cache key. Never collides with tag bookkeeping keys.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.-]{0,23}"
    }

    /// Generate a cached value: scalars and short arrays of scalars.
    pub fn arb_value() -> impl Strategy<Value = CacheValue> {
        let scalar = prop_oneof![
            Just(CacheValue::Null),
            any::<bool>().prop_map(CacheValue::from),
            any::<i64>().prop_map(CacheValue::from),
            "[ -~]{0,32}".prop_map(CacheValue::from),
        ]
        .boxed();
        prop_oneof![
            3 => scalar.clone(),
            1 => prop::collection::vec(scalar, 0..4).prop_map(CacheValue::from),
        ]
    }

    /// Generate a TTL that has not yet expired.
    pub fn arb_live_ttl() -> impl Strategy<Value = Ttl> {
        prop_oneof![
            4 => (1i64..86_400).prop_map(Ttl::Seconds),
            4 => (1u64..86_400).prop_map(|s| Ttl::Duration(std::time::Duration::from_secs(s))),
            1 => arb_extreme_ttl(),
        ]
    }

    /// Generate a positive TTL at or past the edge of representable time.
    pub fn arb_extreme_ttl() -> impl Strategy<Value = Ttl> {
        prop_oneof![
            Just(Ttl::Seconds(i64::MAX)),
            (i64::MAX / 2..=i64::MAX).prop_map(Ttl::Seconds),
            Just(Ttl::Duration(std::time::Duration::MAX)),
            (u64::MAX / 2..=u64::MAX)
                .prop_map(|s| Ttl::Duration(std::time::Duration::from_secs(s))),
        ]
    }

    /// Generate an optional TTL; `None` means forever.
    pub fn arb_ttl() -> impl Strategy<Value = Option<Ttl>> {
        prop::option::of(arb_live_ttl())
    }

    /// Generate a TTL of zero or fewer seconds.
    pub fn arb_expired_ttl() -> impl Strategy<Value = Ttl> {
        (-86_400i64..=0).prop_map(Ttl::Seconds)
    }

    /// Generate a small key/value batch.
    pub fn arb_batch() -> impl Strategy<Value = BTreeMap<String, CacheValue>> {
        prop::collection::btree_map(arb_key(), arb_value(), 1..8)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built topologies for fallback scenarios.

    use super::*;

    /// The usual topology:
    /// - `fallback`: in-memory, no fallback
    /// - `redis`: unreachable, falls back to `fallback`
    /// - `no-fallback`: unreachable, no fallback
    /// - `redisA` / `redisB`: unreachable, falling back to each other
    pub const FALLBACK_TOPOLOGY: &str = r#"
default = "redis"

[stores.fallback]
driver = "array"

[stores.redis]
driver = "unreachable"
fallback = "fallback"

[stores.no-fallback]
driver = "unreachable"

[stores.redisA]
driver = "unreachable"
fallback = "redisB"

[stores.redisB]
driver = "unreachable"
fallback = "redisA"
"#;

    /// Parse [`FALLBACK_TOPOLOGY`].
    pub fn fallback_topology() -> CacheConfig {
        match CacheConfig::from_toml_str(FALLBACK_TOPOLOGY) {
            Ok(config) => config,
            Err(e) => panic!("fallback topology fixture does not parse: {}", e),
        }
    }

    /// A registry over [`fallback_topology`] with the unreachable and
    /// recording drivers installed. Both share the returned log.
    pub fn fallback_registry() -> (StoreRegistry, OperationLog) {
        registry_for(fallback_topology())
    }

    /// A registry over `config` with the test drivers installed.
    pub fn registry_for(config: CacheConfig) -> (StoreRegistry, OperationLog) {
        init_test_tracing();
        let log = OperationLog::new();
        let registry = StoreRegistry::new(config);
        let installed = registry
            .extend(UNREACHABLE_DRIVER, UnreachableDriver::new(log.clone()))
            .and_then(|_| registry.extend(RECORDING_DRIVER, RecordingDriver::new(log.clone())));
        if let Err(e) = installed {
            panic!("test drivers could not be registered: {}", e);
        }
        (registry, log)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on `CachetResult` values.

    use super::*;

    /// Assert that a CachetResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &CachetResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a CachetResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &CachetResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a CachetResult is the failure of an unreachable `store`.
    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &CachetResult<T>, store: &str) {
        match result {
            Err(CachetError::Store(StoreError::Unavailable { store: s, .. })) => {
                assert_eq!(s, store, "Wrong store in Unavailable error");
            }
            other => panic!("Expected Unavailable error for {}, got: {:?}", store, other),
        }
    }

    /// Assert that a CachetResult is a Store error.
    #[track_caller]
    pub fn assert_store_failure<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that a CachetResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CachetResult<T>) {
        match result {
            Err(CachetError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a repository is not mid-dispatch on this thread.
    #[track_caller]
    pub fn assert_idle(repository: &FallbackRepository) {
        assert_eq!(
            repository.dispatch_state(),
            DispatchState::Idle,
            "Repository {:?} left in Dispatching state",
            repository.store_name()
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_fallback_topology_is_valid() {
        let config = fixtures::fallback_topology();
        config.validate().unwrap();
        assert_eq!(config.default, "redis");
        assert_eq!(config.fallback_for("redis"), Some("fallback"));
        assert_eq!(config.fallback_for("no-fallback"), None);
        assert_eq!(config.fallback_for("redisA"), Some("redisB"));
        assert_eq!(config.fallback_for("redisB"), Some("redisA"));
    }

    #[test]
    fn test_unreachable_store_logs_and_fails() {
        let log = OperationLog::new();
        let store = UnreachableStore::new("redis", log.clone());

        assertions::assert_unavailable(&store.get("foo"), "redis");
        assertions::assert_unavailable(&store.put("foo", &json!(1), 10), "redis");

        assert_eq!(store.attempts(), 2);
        assert_eq!(log.entries(), vec!["redis:get", "redis:put"]);
        assert!(!store.supports_tags());
    }

    #[test]
    fn test_recording_store_serves_and_logs() {
        let log = OperationLog::new();
        let store = RecordingStore::new("mem", log.clone());

        store.forever("foo", &json!("bar")).unwrap();
        assert_eq!(store.get("foo").unwrap(), Some(json!("bar")));
        assert_eq!(log.count_for("mem"), 2);
        assert!(store.supports_tags());
        assert!(!RecordingStore::new("mem", log.clone()).untaggable().supports_tags());

        log.clear();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_recording_driver_reads_tags_option() {
        let log = OperationLog::new();
        let driver = RecordingDriver::new(log);

        let taggable = driver
            .build("a", &StoreConfig::new(RECORDING_DRIVER))
            .unwrap();
        assert!(taggable.supports_tags());

        let untaggable = driver
            .build("b", &StoreConfig::new(RECORDING_DRIVER).with_option("tags", false))
            .unwrap();
        assert!(!untaggable.supports_tags());
    }

    #[test]
    fn test_fallback_registry_builds_every_store() {
        let (registry, _log) = fixtures::fallback_registry();
        for name in ["fallback", "redis", "no-fallback", "redisA", "redisB"] {
            let repo = registry.store(name).unwrap();
            assertions::assert_idle(&repo);
        }
        assert_eq!(registry.built_stores().len(), 5);
    }

    proptest! {
        #[test]
        fn prop_generated_keys_avoid_tag_keys(key in generators::arb_key()) {
            prop_assert!(!key.starts_with("tag:"));
            prop_assert!(!key.is_empty());
        }

        #[test]
        fn prop_live_ttls_are_positive(ttl in generators::arb_live_ttl()) {
            prop_assert!(ttl.seconds() > 0);
        }

        #[test]
        fn prop_extreme_ttls_are_positive(ttl in generators::arb_extreme_ttl()) {
            prop_assert!(ttl.seconds() > 0);
        }

        #[test]
        fn prop_expired_ttls_are_not_positive(ttl in generators::arb_expired_ttl()) {
            prop_assert!(ttl.seconds() <= 0);
        }
    }
}
