//! Unit tests for query configuration, state values, and key handling

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_query_rs::{
    EntryOptions, QueryError, QueryKey, QueryKeyPattern, QueryOptions, QueryState, RetentionPolicy,
    RetryConfig, RetryDelay,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct TestUser {
    id: u32,
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_options_defaults() {
        let options = QueryOptions::<TestUser>::default();

        assert!(options.enabled);
        assert_eq!(options.stale_time, Duration::from_secs(5 * 60));
        assert_eq!(options.cache_time, Duration::from_secs(30 * 60));
        assert!(options.refetch_on_mount);
        assert!(!options.refetch_on_window_focus);
        assert!(options.refetch_on_app_focus);
        assert!(options.pause_refetch_in_background);
        assert!(options.refetch_interval.is_none());
        assert_eq!(options.retry.retries, 3);
        assert_eq!(options.retry.delay, RetryDelay::Fixed(Duration::from_secs(1)));
        assert!(!options.keep_previous_data);
        assert_eq!(options.retention, RetentionPolicy::Retained);
    }

    #[test]
    fn test_query_options_builder_pattern() {
        let options = QueryOptions::<TestUser>::default()
            .with_stale_time(Duration::from_secs(60))
            .with_cache_time(Duration::from_secs(300))
            .with_refetch_interval(Duration::from_secs(30))
            .with_retry(RetryConfig::new(5, Duration::from_secs(1)))
            .with_retention(RetentionPolicy::AutoDispose)
            .keep_previous_data()
            .disabled();

        assert_eq!(options.stale_time, Duration::from_secs(60));
        assert_eq!(options.cache_time, Duration::from_secs(300));
        assert_eq!(options.refetch_interval, Some(Duration::from_secs(30)));
        assert_eq!(options.retry.retries, 5);
        assert_eq!(options.retention, RetentionPolicy::AutoDispose);
        assert!(options.keep_previous_data);
        assert!(!options.enabled);
    }

    #[test]
    fn test_options_derive_entry_windows() {
        let options = QueryOptions::<TestUser>::default()
            .with_stale_time(Duration::from_secs(7))
            .with_cache_time(Duration::from_secs(77));

        assert_eq!(
            options.entry_options(),
            EntryOptions {
                stale_time: Duration::from_secs(7),
                cache_time: Duration::from_secs(77),
            }
        );
    }

    #[test]
    fn test_callbacks_survive_options_clone() {
        let options = QueryOptions::<TestUser>::default()
            .with_on_success(|_| {})
            .with_on_error(|_| {})
            .with_on_cache_evicted(|| {});

        let cloned = options.clone();
        assert!(cloned.on_success.is_some());
        assert!(cloned.on_error.is_some());
        assert!(cloned.on_cache_evicted.is_some());
    }

    #[test]
    fn test_query_state_values() {
        let user = TestUser { id: 1, name: "Ada".into() };
        let fetched_at = Instant::now();

        let success = QueryState::Success { data: Arc::new(user.clone()), fetched_at };
        assert!(success.is_success());
        assert_eq!(success.data().unwrap().name, "Ada");
        assert_eq!(success.fetched_at(), Some(fetched_at));

        let refetching = QueryState::Refetching {
            previous_data: Arc::new(user),
            fetched_at,
        };
        assert!(refetching.is_refetching());
        assert!(refetching.data().is_some());

        let error: QueryState<TestUser> = QueryState::Error(QueryError::timeout(5000));
        assert!(error.is_error());
        assert!(error.data().is_none());
        assert_eq!(error.error(), Some(&QueryError::timeout(5000)));

        assert!(QueryState::<TestUser>::Idle.is_idle());
        assert!(QueryState::<TestUser>::Loading.is_loading());
    }

    #[test]
    fn test_query_key_creation_and_matching() {
        let key1 = QueryKey::new(["users", "1"]);
        let key2 = QueryKey::new(["users", "1", "posts"]);
        let key3 = QueryKey::from("simple");

        assert_eq!(key1.segments, vec!["users", "1"]);
        assert_eq!(key1.to_string(), "users:1");
        assert_eq!(key3.len(), 1);

        assert!(key2.matches_pattern(&QueryKeyPattern::Prefix(key1.clone())));
        assert!(!key1.matches_pattern(&QueryKeyPattern::Prefix(key2.clone())));
        assert!(key1.matches_pattern(&QueryKeyPattern::Exact(key1.clone())));
        assert!(key2.matches_pattern(&QueryKeyPattern::Contains("posts".to_string())));
    }

    #[test]
    fn test_parameterised_keys_are_deterministic() {
        #[derive(Serialize, Clone)]
        struct Filter {
            page: u32,
            sort: String,
        }

        let filter = Filter { page: 1, sort: "name".into() };
        let a = QueryKey::with_param("users", &filter).unwrap();
        let b = QueryKey::with_param("users", &filter).unwrap();
        assert_eq!(a, b);

        let other = QueryKey::with_param("users", &Filter { page: 2, sort: "name".into() }).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_retry_delay_strategies() {
        assert_eq!(
            RetryDelay::Fixed(Duration::from_millis(100)).delay_for(5),
            Duration::from_millis(100)
        );

        let linear = RetryDelay::Linear {
            initial: Duration::from_millis(100),
            increment: Duration::from_millis(25),
        };
        assert_eq!(linear.delay_for(0), Duration::from_millis(100));
        assert_eq!(linear.delay_for(4), Duration::from_millis(200));

        let exponential = RetryDelay::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_millis(300),
        };
        assert_eq!(exponential.delay_for(0), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(1), Duration::from_millis(200));
        // Capped by max
        assert_eq!(exponential.delay_for(4), Duration::from_millis(300));
    }
}
