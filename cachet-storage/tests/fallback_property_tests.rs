//! Property-Based Tests for Fallback Dispatch
//!
//! Property: for any key, value and TTL, an operation on a store that fails
//! SHALL have the same observable effect as the same operation issued
//! directly on its fallback store.
//!
//! This validates:
//! - Arguments reach the fallback store unchanged
//! - TTL handling is identical on both paths, out to unrepresentable lifetimes
//! - Successful operations never touch the registry

use cachet_storage::{CacheValue, FallbackRepository, StoreRegistry};
use cachet_test_utils::assertions::{assert_idle, assert_unavailable};
use cachet_test_utils::fixtures::fallback_registry;
use cachet_test_utils::generators::{
    arb_batch, arb_expired_ttl, arb_extreme_ttl, arb_key, arb_ttl, arb_value,
};
use proptest::prelude::*;
use std::sync::Arc;

fn stores(registry: &StoreRegistry) -> (Arc<FallbackRepository>, Arc<FallbackRepository>) {
    (
        registry.store("redis").unwrap(),
        registry.store("fallback").unwrap(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A put on the failing store is readable from the fallback store.
    #[test]
    fn prop_put_lands_on_fallback(key in arb_key(), value in arb_value(), ttl in arb_ttl()) {
        let (registry, _log) = fallback_registry();
        let (redis, fallback) = stores(&registry);

        prop_assert!(redis.put(&key, value.clone(), ttl).unwrap());

        prop_assert_eq!(fallback.get(&key).unwrap(), Some(value.clone()));
        prop_assert_eq!(redis.get(&key).unwrap(), Some(value));
        assert_idle(&redis);
    }

    /// A TTL past the edge of representable time still lands, without expiry.
    #[test]
    fn prop_extreme_ttl_lands_on_fallback(key in arb_key(), value in arb_value(), ttl in arb_extreme_ttl()) {
        let (registry, _log) = fallback_registry();
        let (redis, fallback) = stores(&registry);

        prop_assert!(redis.put(&key, value.clone(), Some(ttl)).unwrap());
        prop_assert!(!redis.add(&key, value.clone(), Some(ttl)).unwrap());

        prop_assert_eq!(fallback.get(&key).unwrap(), Some(value.clone()));
        prop_assert_eq!(redis.get(&key).unwrap(), Some(value));
        assert_idle(&redis);
    }

    /// An expired TTL forgets the key through the fallback store.
    #[test]
    fn prop_expired_ttl_forgets(key in arb_key(), value in arb_value(), ttl in arb_expired_ttl()) {
        let (registry, _log) = fallback_registry();
        let (redis, fallback) = stores(&registry);
        fallback.forever(&key, value.clone()).unwrap();

        prop_assert!(redis.put(&key, value.clone(), Some(ttl)).unwrap());
        prop_assert_eq!(fallback.get(&key).unwrap(), None);
        prop_assert!(!redis.add(&key, value, Some(ttl)).unwrap());
    }

    /// Counter arithmetic through the fallback store matches plain sums.
    #[test]
    fn prop_counters_through_fallback(
        key in arb_key(),
        steps in prop::collection::vec(-1000i64..1000, 1..16),
    ) {
        let (registry, _log) = fallback_registry();
        let (redis, fallback) = stores(&registry);

        let mut expected = 0i64;
        for step in &steps {
            expected += step;
            let got = if *step >= 0 {
                redis.increment(&key, *step).unwrap()
            } else {
                redis.decrement(&key, -step).unwrap()
            };
            prop_assert_eq!(got, expected);
        }
        prop_assert_eq!(fallback.get(&key).unwrap(), Some(CacheValue::from(expected)));
        prop_assert_eq!(registry.stats().fallback_dispatches, steps.len() as u64);
    }

    /// Batches written through the failing store read back in full.
    #[test]
    fn prop_batches_through_fallback(batch in arb_batch(), ttl in arb_ttl()) {
        let (registry, _log) = fallback_registry();
        let (redis, _fallback) = stores(&registry);

        prop_assert!(redis.put_many(&batch, ttl).unwrap());

        let keys: Vec<&String> = batch.keys().collect();
        let found = redis.many(&keys).unwrap();
        prop_assert_eq!(found.len(), batch.len());
        for (key, value) in &batch {
            prop_assert_eq!(found[key].as_ref(), Some(value));
        }
    }

    /// Operations that succeed on their own store never consult the registry.
    #[test]
    fn prop_success_is_registry_free(key in arb_key(), value in arb_value(), ttl in arb_ttl()) {
        let (registry, log) = fallback_registry();
        let fallback = registry.store("fallback").unwrap();
        let before = registry.stats();

        fallback.put(&key, value, ttl).unwrap();
        fallback.get(&key).unwrap();
        fallback.forget(&key).unwrap();

        prop_assert_eq!(registry.stats(), before);
        prop_assert!(log.entries().is_empty());
    }

    /// Without a fallback the caller sees the store's own failure, every time.
    #[test]
    fn prop_no_fallback_reraises(key in arb_key(), value in arb_value(), attempts in 1usize..5) {
        let (registry, log) = fallback_registry();
        let store = registry.store("no-fallback").unwrap();

        for _ in 0..attempts {
            assert_unavailable(&store.forever(&key, value.clone()), "no-fallback");
            assert_idle(&store);
        }
        prop_assert_eq!(log.count_for("no-fallback"), attempts);
    }
}
