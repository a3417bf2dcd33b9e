//! Query Cache
//!
//! Keyed store of cache entries with LRU eviction, staleness and retention
//! windows, hit/miss statistics, per-key change listeners, and an adaptive
//! cleanup scheduler.

mod entry;

pub use entry::CacheEntry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::listeners::{ListenerSet, Subscription};
use crate::retry::QueryError;
use crate::types::{CacheStats, EntryOptions, QueryKey, QueryKeyPattern};

/// Default maximum number of entries before LRU eviction kicks in
const DEFAULT_MAX_SIZE: usize = 100;

/// Grace period added to the soonest expiry when scheduling cleanup
const CLEANUP_BUFFER: Duration = Duration::from_secs(60);

/// Cleanup cadence while the cache is empty
const IDLE_CLEANUP_INTERVAL: Duration = Duration::from_secs(30 * 60);

struct Slot {
    entry: CacheEntry,
    touch: u64,
}

struct CleanupTask {
    handle: Option<JoinHandle<()>>,
    next_at: Option<Instant>,
}

struct CacheInner {
    store: RwLock<HashMap<QueryKey, Slot>>,
    listeners: RwLock<HashMap<QueryKey, ListenerSet<Option<CacheEntry>>>>,
    max_size: usize,
    touch_counter: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    cleanup: Mutex<CleanupTask>,
    cleanup_started: AtomicBool,
    disposed: AtomicBool,
}

/// The shared cache behind every query engine.
///
/// All mutation goes through this API; every eviction route (LRU overflow,
/// retention expiry, explicit removal, pattern purge, clear) notifies the
/// key's listeners with `None`.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        let cache = Self {
            inner: Arc::new(CacheInner {
                store: RwLock::new(HashMap::new()),
                listeners: RwLock::new(HashMap::new()),
                max_size,
                touch_counter: AtomicU64::new(0),
                hit_count: AtomicU64::new(0),
                miss_count: AtomicU64::new(0),
                eviction_count: AtomicU64::new(0),
                cleanup: Mutex::new(CleanupTask { handle: None, next_at: None }),
                cleanup_started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        };
        cache.ensure_cleanup_task();
        cache
    }

    /// Look up an entry. An entry past its retention window is removed on
    /// read and reported as a miss; a hit marks the entry most recently used.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        enum Read {
            Hit(CacheEntry),
            Expired,
            Miss,
        }

        let inner = &self.inner;
        let read = {
            let mut store = inner.store.write();
            let read = match store.get_mut(key) {
                Some(slot) => {
                    if slot.entry.should_evict() {
                        Read::Expired
                    } else {
                        slot.touch = inner.touch_counter.fetch_add(1, Ordering::Relaxed);
                        Read::Hit(slot.entry.clone())
                    }
                }
                None => Read::Miss,
            };
            if matches!(read, Read::Expired) {
                store.remove(key);
            }
            read
        };

        match read {
            Read::Hit(entry) => {
                inner.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Read::Expired => {
                inner.miss_count.fetch_add(1, Ordering::Relaxed);
                inner.eviction_count.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache entry expired on read");
                inner.notify(key, None);
                None
            }
            Read::Miss => {
                inner.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Typed read of a data entry's payload.
    pub fn get_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.get(key).and_then(|entry| entry.data::<T>())
    }

    /// Read an entry without touching hit/miss statistics or LRU order.
    /// Used for staleness probes that should not distort accounting.
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner
            .store
            .read()
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    /// Store an entry, enforcing the size limit. When `notify` is set, the
    /// key's listeners receive the new entry.
    pub fn set(&self, key: &QueryKey, entry: CacheEntry, notify: bool) {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.ensure_cleanup_task();

        let evicted = {
            let mut store = inner.store.write();
            let touch = inner.touch_counter.fetch_add(1, Ordering::Relaxed);
            store.insert(key.clone(), Slot { entry: entry.clone(), touch });

            if store.len() > inner.max_size {
                let lru = store
                    .iter()
                    .min_by_key(|(_, slot)| slot.touch)
                    .map(|(k, _)| k.clone());
                if let Some(lru) = &lru {
                    store.remove(lru);
                }
                lru
            } else {
                None
            }
        };

        if let Some(lru) = evicted {
            inner.eviction_count.fetch_add(1, Ordering::Relaxed);
            debug!(key = %lru, "evicted least recently used cache entry");
            inner.notify(&lru, None);
        }

        if notify {
            inner.notify(key, Some(entry));
        }
    }

    /// Construct and store a data entry.
    pub fn set_data<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
        data: T,
        options: EntryOptions,
    ) {
        self.set(key, CacheEntry::with_data(data, options), true);
    }

    /// Construct and store a data entry with an explicit timestamp and
    /// notification choice.
    pub fn set_data_at<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
        data: T,
        options: EntryOptions,
        fetched_at: Instant,
        notify: bool,
    ) {
        let entry = CacheEntry::with_data(data, options).fetched_at_instant(fetched_at);
        self.set(key, entry, notify);
    }

    /// Construct and store an error entry.
    pub fn set_error(&self, key: &QueryKey, error: QueryError, options: EntryOptions) {
        self.set(key, CacheEntry::with_error(error, options), true);
    }

    /// Remove one entry. Returns whether it was present; listeners are told
    /// with `None` when `notify` is set.
    pub fn remove(&self, key: &QueryKey, notify: bool) -> bool {
        let removed = self.inner.store.write().remove(key).is_some();
        if removed {
            debug!(%key, "removed cache entry");
            if notify {
                self.inner.notify(key, None);
            }
        }
        removed
    }

    /// Remove every entry. Each removed key's listeners are notified once.
    pub fn clear(&self) {
        let keys: Vec<QueryKey> = {
            let mut store = self.inner.store.write();
            let keys = store.keys().cloned().collect();
            store.clear();
            keys
        };

        debug!(removed = keys.len(), "cleared cache");
        for key in &keys {
            self.inner.notify(key, None);
        }
    }

    /// Remove every entry whose key matches the pattern.
    pub fn remove_by_pattern(&self, pattern: &QueryKeyPattern, notify: bool) -> usize {
        let keys: Vec<QueryKey> = {
            let mut store = self.inner.store.write();
            let keys: Vec<QueryKey> = store
                .keys()
                .filter(|key| key.matches_pattern(pattern))
                .cloned()
                .collect();
            for key in &keys {
                store.remove(key);
            }
            keys
        };

        if notify {
            for key in &keys {
                self.inner.notify(key, None);
            }
        }
        keys.len()
    }

    /// Back-date every matching entry so it reads as stale. Listeners are
    /// not notified; callers wanting revalidation should invalidate instead.
    pub fn mark_stale_by_pattern(&self, pattern: &QueryKeyPattern) -> usize {
        let mut store = self.inner.store.write();
        let mut count = 0;
        for (key, slot) in store.iter_mut() {
            if key.matches_pattern(pattern) {
                slot.entry = slot.entry.clone().marked_stale();
                count += 1;
            }
        }
        count
    }

    /// Scan for and remove every entry past its retention window.
    pub fn cleanup(&self) -> usize {
        self.inner.cleanup_expired()
    }

    /// Register a per-key listener, invoked with the new entry on set and
    /// with `None` on removal/eviction. Close the handle to detach.
    pub fn add_listener(
        &self,
        key: &QueryKey,
        callback: impl Fn(&Option<CacheEntry>) + Send + Sync + 'static,
    ) -> Subscription {
        let mut listeners = self.inner.listeners.write();
        listeners
            .entry(key.clone())
            .or_default()
            .subscribe(callback)
    }

    /// Drop every listener registered on `key`.
    pub fn remove_all_listeners(&self, key: &QueryKey) {
        self.inner.listeners.write().remove(key);
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.inner.store.read();
        CacheStats {
            total_entries: store.len(),
            stale_entries: store.values().filter(|slot| slot.entry.is_stale()).count(),
            hit_count: self.inner.hit_count.load(Ordering::Relaxed),
            miss_count: self.inner.miss_count.load(Ordering::Relaxed),
            eviction_count: self.inner.eviction_count.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.inner.hit_count.store(0, Ordering::Relaxed);
        self.inner.miss_count.store(0, Ordering::Relaxed);
        self.inner.eviction_count.store(0, Ordering::Relaxed);
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.store.read().keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.inner.store.read().len()
    }

    pub fn contains_key(&self, key: &QueryKey) -> bool {
        self.inner.store.read().contains_key(key)
    }

    /// When the next scheduled cleanup pass fires, if a scheduler is running.
    pub fn next_cleanup_time(&self) -> Option<Instant> {
        self.inner.cleanup.lock().next_at
    }

    /// Tear the cache down: stop the cleanup task, drop all entries and
    /// listeners without notification.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let mut cleanup = self.inner.cleanup.lock();
        if let Some(handle) = cleanup.handle.take() {
            handle.abort();
        }
        cleanup.next_at = None;
        drop(cleanup);

        self.inner.store.write().clear();
        self.inner.listeners.write().clear();
    }

    /// Start the adaptive cleanup task if a tokio runtime is available.
    /// Called from the constructor and again on writes, so caches built
    /// outside a runtime pick the task up on first use inside one.
    fn ensure_cleanup_task(&self) {
        if self.inner.cleanup_started.load(Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.inner.cleanup_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            loop {
                let delay = match weak.upgrade() {
                    Some(inner) if !inner.disposed.load(Ordering::SeqCst) => {
                        let delay = inner.cleanup_delay();
                        inner.cleanup.lock().next_at = Some(Instant::now() + delay);
                        delay
                    }
                    _ => break,
                };

                tokio::time::sleep(delay).await;

                match weak.upgrade() {
                    Some(inner) if !inner.disposed.load(Ordering::SeqCst) => {
                        inner.cleanup_expired();
                    }
                    _ => break,
                }
            }
        });
        self.inner.cleanup.lock().handle = Some(handle);
    }
}

impl CacheInner {
    fn notify(&self, key: &QueryKey, entry: Option<CacheEntry>) {
        let set = self.listeners.read().get(key).cloned();
        if let Some(set) = set {
            set.emit(&entry);
        }
    }

    fn cleanup_expired(&self) -> usize {
        let expired: Vec<QueryKey> = {
            let mut store = self.store.write();
            let expired: Vec<QueryKey> = store
                .iter()
                .filter(|(_, slot)| slot.entry.should_evict())
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                store.remove(key);
            }
            expired
        };

        if !expired.is_empty() {
            self.eviction_count
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            info!(removed = expired.len(), "cache cleanup pass completed");
            for key in &expired {
                self.notify(key, None);
            }
        }
        expired.len()
    }

    /// Time until the next cleanup pass. Tracks the soonest expiry (plus a
    /// grace buffer) clamped to [1 min, shortest cache_time / 2]; falls back
    /// to shortest/4 in [5 min, 30 min] when the clamp window inverts, and to
    /// a slow half-hour cadence while empty.
    fn cleanup_delay(&self) -> Duration {
        let store = self.store.read();
        if store.is_empty() {
            return IDLE_CLEANUP_INTERVAL;
        }

        let shortest = store
            .values()
            .map(|slot| slot.entry.cache_time())
            .min()
            .unwrap_or(IDLE_CLEANUP_INTERVAL);
        let lower = Duration::from_secs(60);
        let upper = shortest / 2;
        if upper < lower {
            return (shortest / 4).clamp(Duration::from_secs(5 * 60), IDLE_CLEANUP_INTERVAL);
        }

        let soonest = match store.values().map(|slot| slot.entry.expires_at()).min() {
            Some(soonest) => soonest,
            None => return IDLE_CLEANUP_INTERVAL,
        };
        let until = soonest.saturating_duration_since(Instant::now()) + CLEANUP_BUFFER;
        until.clamp(lower, upper)
    }
}
