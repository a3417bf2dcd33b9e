//! Property-based tests for cache invariants and edge cases

use std::time::{Duration, Instant};

use async_query_rs::{
    EntryOptions, QueryCache, QueryError, QueryKey, QueryKeyPattern, RetryConfig,
};
use proptest::prelude::*;

// Property test strategies
prop_compose! {
    fn arb_query_key()(
        segments in prop::collection::vec("[a-zA-Z0-9_]{1,20}", 1..5)
    ) -> QueryKey {
        QueryKey::new(segments)
    }
}

prop_compose! {
    fn arb_window_secs()(
        secs in 0..3600u64
    ) -> Duration {
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_query_key_display_roundtrip(segments in prop::collection::vec("[a-zA-Z0-9_]{1,20}", 1..5)) {
            // Property: key equality is segment equality and Display joins segments
            let key1 = QueryKey::new(segments.clone());
            let key2 = QueryKey::new(segments.clone());
            prop_assert_eq!(&key1, &key2);
            prop_assert_eq!(key1.to_string(), segments.join(":"));
        }

        #[test]
        fn test_query_key_pattern_exact_match(key in arb_query_key()) {
            // Property: exact pattern always matches itself
            let pattern = QueryKeyPattern::Exact(key.clone());
            prop_assert!(key.matches_pattern(&pattern));
        }

        #[test]
        fn test_query_key_pattern_prefix_match(
            prefix_segments in prop::collection::vec("[a-zA-Z0-9_]{1,20}", 1..3),
            suffix_segments in prop::collection::vec("[a-zA-Z0-9_]{1,20}", 0..3)
        ) {
            // Property: prefix pattern matches every extension of the prefix
            let prefix = QueryKey::new(prefix_segments);
            let mut full_segments = prefix.segments.clone();
            full_segments.extend(suffix_segments);
            let full_key = QueryKey::new(full_segments);

            let pattern = QueryKeyPattern::Prefix(prefix);
            prop_assert!(full_key.matches_pattern(&pattern));
        }

        #[test]
        fn test_query_key_pattern_contains_match(
            key_segments in prop::collection::vec("[a-zA-Z0-9_]{1,20}", 1..5),
            substring in "[a-zA-Z0-9_]{1,10}"
        ) {
            // Property: contains matches iff any segment contains the substring
            let key = QueryKey::new(key_segments);
            let pattern = QueryKeyPattern::Contains(substring.clone());

            let should_match = key.segments.iter().any(|segment| segment.contains(&substring));
            prop_assert_eq!(key.matches_pattern(&pattern), should_match);
        }

        #[test]
        fn test_staleness_is_deterministic_in_entry_age(
            stale_time in arb_window_secs(),
            age in arb_window_secs()
        ) {
            // Property: staleness depends only on age vs the stale window
            let cache = QueryCache::new();
            let key = QueryKey::from("aging");
            let windows = EntryOptions {
                stale_time,
                cache_time: Duration::from_secs(7200),
            };

            let fetched_at = Instant::now().checked_sub(age);
            prop_assume!(fetched_at.is_some());
            cache.set_data_at(&key, 1u8, windows, fetched_at.unwrap(), false);
            let entry = cache.peek(&key).unwrap();
            prop_assert_eq!(entry.is_stale(), age >= stale_time);
            prop_assert!(!entry.should_evict());
        }

        #[test]
        fn test_expiry_is_deterministic_in_entry_age(
            cache_time in arb_window_secs(),
            age in arb_window_secs()
        ) {
            // Property: a read past the retention window is a miss that removes the entry
            let cache = QueryCache::new();
            let key = QueryKey::from("retained");
            let windows = EntryOptions { stale_time: Duration::ZERO, cache_time };

            let fetched_at = Instant::now().checked_sub(age);
            prop_assume!(fetched_at.is_some());
            cache.set_data_at(&key, 1u8, windows, fetched_at.unwrap(), false);
            let expired = age >= cache_time;
            prop_assert_eq!(cache.get(&key).is_none(), expired);
            prop_assert_eq!(cache.contains_key(&key), !expired);
        }

        #[test]
        fn test_lru_eviction_matches_access_order_model(
            entry_count in 2usize..6,
            accesses in prop::collection::vec(0usize..6, 0..12)
        ) {
            // Property: a hit moves the key to the MRU slot; overflow evicts the LRU key
            let cache = QueryCache::with_max_size(entry_count);
            let keys: Vec<QueryKey> =
                (0..entry_count).map(|i| QueryKey::new(["k".to_string(), i.to_string()])).collect();

            // Model: access-ordered list, front = least recently used.
            let mut model: Vec<usize> = Vec::new();
            for (i, key) in keys.iter().enumerate() {
                cache.set_data(key, i as u32, EntryOptions::default());
                model.push(i);
            }
            for access in accesses {
                let i = access % entry_count;
                prop_assert!(cache.get(&keys[i]).is_some());
                model.retain(|&k| k != i);
                model.push(i);
            }

            let overflow = QueryKey::from("overflow");
            cache.set_data(&overflow, 99u32, EntryOptions::default());

            let evicted = model[0];
            prop_assert!(!cache.contains_key(&keys[evicted]));
            for &kept in &model[1..] {
                prop_assert!(cache.contains_key(&keys[kept]));
            }
            prop_assert!(cache.contains_key(&overflow));
            prop_assert_eq!(cache.size(), entry_count);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_retry_bound_is_exactly_one_plus_retries(retries in 0u32..4) {
            // Property: a persistently failing operation runs 1 + retries times
            use std::sync::Arc;
            use std::sync::atomic::{AtomicU32, Ordering};

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            let calls = Arc::new(AtomicU32::new(0));
            let config = RetryConfig::new(retries, Duration::from_millis(1));

            let result: Result<(), QueryError> = runtime.block_on(
                async_query_rs::retry::execute_with_retry(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err(QueryError::network("always down")) }
                    },
                    &config,
                ),
            );

            prop_assert!(result.is_err());
            prop_assert_eq!(calls.load(Ordering::SeqCst), retries + 1);
        }
    }
}
