//! Unit tests for cache operations and invalidation patterns

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_query_rs::{
    CacheEntry, EntryOptions, QueryCache, QueryClient, QueryError, QueryKey, QueryKeyPattern,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct TestData {
    id: u32,
    value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct User {
    id: u32,
    name: String,
}

fn windows(stale_secs: u64, cache_secs: u64) -> EntryOptions {
    EntryOptions {
        stale_time: Duration::from_secs(stale_secs),
        cache_time: Duration::from_secs(cache_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cache_operations() {
        let cache = QueryCache::new();
        let key = QueryKey::new(["test", "data"]);
        let data = TestData { id: 1, value: "test value".to_string() };

        cache.set_data(&key, data.clone(), EntryOptions::default());

        let entry = cache.get(&key).expect("entry present");
        assert!(entry.has_data());
        assert_eq!(*entry.data::<TestData>().unwrap(), data);

        assert!(cache.remove(&key, true));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_cache_with_different_data_types() {
        let cache = QueryCache::new();
        let opts = EntryOptions::default();

        cache.set_data(&QueryKey::from("string"), "Hello, World!".to_string(), opts);
        cache.set_data(&QueryKey::from("number"), 42i32, opts);
        cache.set_data(&QueryKey::from("vector"), vec![1, 2, 3, 4, 5], opts);

        assert_eq!(
            *cache.get_data::<String>(&QueryKey::from("string")).unwrap(),
            "Hello, World!"
        );
        assert_eq!(*cache.get_data::<i32>(&QueryKey::from("number")).unwrap(), 42);
        assert_eq!(
            *cache.get_data::<Vec<i32>>(&QueryKey::from("vector")).unwrap(),
            vec![1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn test_type_mismatch_is_a_miss_not_a_panic() {
        let cache = QueryCache::new();
        let key = QueryKey::from("typed");

        cache.set_data(&key, 42u32, EntryOptions::default());
        assert!(cache.get_data::<String>(&key).is_none());
        assert!(cache.get_data::<u32>(&key).is_some());
    }

    #[test]
    fn test_data_replaces_error_and_back() {
        let cache = QueryCache::new();
        let key = QueryKey::from("flip");
        let opts = EntryOptions::default();

        cache.set_error(&key, QueryError::network("down"), opts);
        let entry = cache.get(&key).unwrap();
        assert!(!entry.has_data());
        assert!(entry.error().is_some());

        cache.set_data(&key, 1u8, opts);
        let entry = cache.get(&key).unwrap();
        assert!(entry.has_data());
        assert!(entry.error().is_none());
    }

    #[test]
    fn test_invalidation_exact_prefix_contains() {
        let client = QueryClient::new();
        let user1 = QueryKey::new(["users", "1"]);
        let user2 = QueryKey::new(["users", "2"]);
        let post1 = QueryKey::new(["posts", "1"]);

        let seed = |client: &QueryClient| {
            client.set_query_data(&user1, User { id: 1, name: "John".into() });
            client.set_query_data(&user2, User { id: 2, name: "Jane".into() });
            client.set_query_data(&post1, TestData { id: 1, value: "post".into() });
        };

        seed(&client);
        client.invalidate_queries(&QueryKeyPattern::Exact(user1.clone()));
        assert!(!client.has_query_data(&user1));
        assert!(client.has_query_data(&user2));
        assert!(client.has_query_data(&post1));

        seed(&client);
        client.invalidate_queries(&QueryKeyPattern::Prefix(QueryKey::from("users")));
        assert!(!client.has_query_data(&user1));
        assert!(!client.has_query_data(&user2));
        assert!(client.has_query_data(&post1));

        seed(&client);
        client.invalidate_queries(&QueryKeyPattern::Contains("1".to_string()));
        assert!(!client.has_query_data(&user1));
        assert!(client.has_query_data(&user2));
        assert!(!client.has_query_data(&post1));
    }

    #[test]
    fn test_hit_miss_and_eviction_stats() {
        let cache = QueryCache::new();
        let key = QueryKey::from("stats");

        assert!(cache.get(&key).is_none());
        cache.set_data(&key, 1u8, EntryOptions::default());
        assert!(cache.get(&key).is_some());
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.eviction_count, 0);

        cache.reset_stats();
        let stats = cache.stats();
        assert_eq!(stats.miss_count, 0);
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_lru_eviction_notifies_evicted_key_once() {
        let cache = QueryCache::with_max_size(3);
        let opts = windows(60, 600);
        let (a, b, c, d) = (
            QueryKey::from("a"),
            QueryKey::from("b"),
            QueryKey::from("c"),
            QueryKey::from("d"),
        );

        let b_nulls = Arc::new(AtomicUsize::new(0));
        let _sub = cache.add_listener(&b, {
            let b_nulls = b_nulls.clone();
            move |entry| {
                if entry.is_none() {
                    b_nulls.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        cache.set_data(&a, 1u8, opts);
        cache.set_data(&b, 2u8, opts);
        cache.set_data(&c, 3u8, opts);
        assert!(cache.get(&a).is_some());
        cache.set_data(&d, 4u8, opts);

        assert_eq!(cache.size(), 3);
        assert!(!cache.contains_key(&b));
        assert!(cache.contains_key(&a));
        assert!(cache.contains_key(&c));
        assert!(cache.contains_key(&d));
        assert_eq!(b_nulls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mark_stale_does_not_notify() {
        let cache = QueryCache::new();
        let key = QueryKey::from("quiet");
        let notifications = Arc::new(AtomicUsize::new(0));

        cache.set_data(&key, 1u8, windows(3600, 7200));
        let _sub = cache.add_listener(&key, {
            let notifications = notifications.clone();
            move |_| {
                notifications.fetch_add(1, Ordering::SeqCst);
            }
        });

        let marked = cache.mark_stale_by_pattern(&QueryKeyPattern::Exact(key.clone()));
        assert_eq!(marked, 1);
        assert_eq!(notifications.load(Ordering::SeqCst), 0);
        assert!(cache.peek(&key).unwrap().is_stale());
        // Retention window unaffected: the entry is stale, not evicted.
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_listener_subscription_handles() {
        let cache = QueryCache::new();
        let key = QueryKey::from("handles");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let sub1 = cache.add_listener(&key, {
            let first = first.clone();
            move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            }
        });
        let _sub2 = cache.add_listener(&key, {
            let second = second.clone();
            move |_| {
                second.fetch_add(1, Ordering::SeqCst);
            }
        });

        cache.set_data(&key, 1u8, EntryOptions::default());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // Closing one handle leaves the other attached.
        sub1.close();
        cache.set_data(&key, 2u8, EntryOptions::default());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);

        cache.remove_all_listeners(&key);
        cache.set_data(&key, 3u8, EntryOptions::default());
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cleanup_scan_removes_expired_entries() {
        let cache = QueryCache::new();
        let expired_key = QueryKey::from("expired");
        let live_key = QueryKey::from("live");
        let nulls = Arc::new(AtomicUsize::new(0));

        cache.set_data(&expired_key, 1u8, windows(0, 0));
        cache.set_data(&live_key, 2u8, windows(60, 600));
        let _sub = cache.add_listener(&expired_key, {
            let nulls = nulls.clone();
            move |entry| {
                if entry.is_none() {
                    nulls.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        assert_eq!(cache.cleanup(), 1);
        assert!(!cache.contains_key(&expired_key));
        assert!(cache.contains_key(&live_key));
        assert_eq!(nulls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().eviction_count, 1);
    }

    #[test]
    fn test_explicit_fetched_at_controls_staleness() {
        let cache = QueryCache::new();
        let key = QueryKey::from("backdated");

        cache.set_data_at(
            &key,
            1u8,
            windows(60, 600),
            Instant::now() - Duration::from_secs(120),
            false,
        );

        let entry = cache.peek(&key).unwrap();
        assert!(entry.is_stale());
        assert!(!entry.should_evict());
    }

    #[test]
    fn test_entry_built_directly_roundtrips_through_set() {
        let cache = QueryCache::new();
        let key = QueryKey::from("direct");
        let entry = CacheEntry::with_data(TestData { id: 9, value: "x".into() }, windows(60, 600));

        cache.set(&key, entry, false);
        assert_eq!(cache.get_data::<TestData>(&key).unwrap().id, 9);
    }

    #[test]
    fn test_keys_and_size_reflect_contents() {
        let cache = QueryCache::new();
        cache.set_data(&QueryKey::from("one"), 1u8, EntryOptions::default());
        cache.set_data(&QueryKey::from("two"), 2u8, EntryOptions::default());

        assert_eq!(cache.size(), 2);
        let mut keys: Vec<String> = cache.keys().iter().map(|k| k.to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["one", "two"]);

        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(cache.keys().is_empty());
    }
}
