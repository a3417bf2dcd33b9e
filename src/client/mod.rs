//! Query Client
//!
//! A thin façade over a single shared cache: pattern invalidation, direct
//! data access, stats, and externally scheduled refetches.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::types::{CacheStats, EntryOptions, QueryKey, QueryKeyPattern};

/// The main query client.
///
/// `global()` returns the process-wide instance backing engines built with
/// `QueryEngine::new`; tests and embedded stacks can wrap their own cache
/// with `new`/`with_cache`.
#[derive(Clone)]
pub struct QueryClient {
    cache: QueryCache,
    refetch_tasks: Arc<Mutex<HashMap<QueryKey, JoinHandle<()>>>>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClient {
    pub fn new() -> Self {
        Self::with_cache(QueryCache::new())
    }

    pub fn with_cache(cache: QueryCache) -> Self {
        Self {
            cache,
            refetch_tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The process-wide client. Initialized on first use; `dispose` on
    /// application shutdown.
    pub fn global() -> &'static QueryClient {
        static GLOBAL: OnceLock<QueryClient> = OnceLock::new();
        GLOBAL.get_or_init(QueryClient::new)
    }

    /// The cache behind this client.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Remove every matching entry, notifying listeners so subscribed
    /// engines observe the eviction and revalidate. Returns the number of
    /// entries removed.
    pub fn invalidate_queries(&self, pattern: &QueryKeyPattern) -> usize {
        let removed = self.cache.remove_by_pattern(pattern, true);
        debug!(?pattern, removed, "invalidated queries");
        removed
    }

    /// Drop every entry, notifying per-key listeners once each.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    /// Remove every matching entry without notification: entries vanish and
    /// nothing revalidates.
    pub fn remove_queries(&self, pattern: &QueryKeyPattern) -> usize {
        self.cache.remove_by_pattern(pattern, false)
    }

    /// Write a value for a key with default entry windows.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
        self.cache.set_data(key, data, EntryOptions::default());
    }

    /// Write a value for a key with explicit windows.
    pub fn set_query_data_with<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
        data: T,
        options: EntryOptions,
    ) {
        self.cache.set_data(key, data, options);
    }

    /// Read a key's cached value.
    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.cache.get_data::<T>(key)
    }

    pub fn has_query_data(&self, key: &QueryKey) -> bool {
        self.cache.contains_key(key)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Run a cleanup pass now. Returns the number of expired entries removed.
    pub fn cleanup_cache(&self) -> usize {
        self.cache.cleanup()
    }

    pub fn cache_keys(&self) -> Vec<QueryKey> {
        self.cache.keys()
    }

    /// Run `callback` every `interval` until cancelled. One schedule per key;
    /// rescheduling a key replaces its previous task.
    pub fn schedule_refetch(
        &self,
        key: &QueryKey,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%key, "no runtime available; refetch schedule dropped");
            return;
        };

        let task = runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                callback();
            }
        });

        if let Some(previous) = self.refetch_tasks.lock().insert(key.clone(), task) {
            previous.abort();
        }
    }

    /// Cancel a scheduled refetch. Returns whether one existed.
    pub fn cancel_refetch(&self, key: &QueryKey) -> bool {
        match self.refetch_tasks.lock().remove(key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every schedule and tear the cache down.
    pub fn dispose(&self) {
        let mut tasks = self.refetch_tasks.lock();
        for (_, task) in tasks.drain() {
            task.abort();
        }
        drop(tasks);
        self.cache.dispose();
    }
}
