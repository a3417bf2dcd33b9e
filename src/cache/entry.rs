//! Type-erased cache entries.
//!
//! The cache stores heterogeneous payload types under string-like keys, so an
//! entry holds its value as `Arc<dyn Any>` together with a type tag. All
//! operations on a given key must use the same payload type; a mismatched
//! read logs a warning and behaves as a miss.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::retry::QueryError;
use crate::types::EntryOptions;

#[derive(Clone)]
enum Payload {
    Data {
        value: Arc<dyn Any + Send + Sync>,
        type_id: TypeId,
        type_name: &'static str,
    },
    Error(QueryError),
}

/// An immutable record stored under a cache key.
///
/// An entry holds either data or an error, never both; storing one replaces
/// the other. Mutation happens only by replacement.
#[derive(Clone)]
pub struct CacheEntry {
    payload: Payload,
    fetched_at: Instant,
    stale_time: Duration,
    cache_time: Duration,
}

impl CacheEntry {
    /// Build a data entry fetched now.
    pub fn with_data<T: Send + Sync + 'static>(value: T, options: EntryOptions) -> Self {
        Self {
            payload: Payload::Data {
                value: Arc::new(value),
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
            },
            fetched_at: Instant::now(),
            stale_time: options.stale_time,
            cache_time: options.cache_time,
        }
    }

    /// Build a data entry around an already-shared payload, so the writer
    /// and the cache hold the same allocation.
    pub fn with_shared_data<T: Send + Sync + 'static>(value: Arc<T>, options: EntryOptions) -> Self {
        Self {
            payload: Payload::Data {
                value,
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
            },
            fetched_at: Instant::now(),
            stale_time: options.stale_time,
            cache_time: options.cache_time,
        }
    }

    /// Build an error entry fetched now.
    pub fn with_error(error: QueryError, options: EntryOptions) -> Self {
        Self {
            payload: Payload::Error(error),
            fetched_at: Instant::now(),
            stale_time: options.stale_time,
            cache_time: options.cache_time,
        }
    }

    /// Override the fetch timestamp.
    pub fn fetched_at_instant(mut self, fetched_at: Instant) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// The payload, when this is a data entry of type `T`.
    pub fn data<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match &self.payload {
            Payload::Data { value, type_id, type_name } => {
                if *type_id == TypeId::of::<T>() {
                    value.clone().downcast::<T>().ok()
                } else {
                    warn!(
                        stored = type_name,
                        requested = std::any::type_name::<T>(),
                        "cache entry type mismatch"
                    );
                    None
                }
            }
            Payload::Error(_) => None,
        }
    }

    /// The stored error, when this is an error entry.
    pub fn error(&self) -> Option<&QueryError> {
        match &self.payload {
            Payload::Error(error) => Some(error),
            Payload::Data { .. } => None,
        }
    }

    pub fn has_data(&self) -> bool {
        matches!(self.payload, Payload::Data { .. })
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    pub fn cache_time(&self) -> Duration {
        self.cache_time
    }

    /// Whether the entry's age has passed its stale window.
    pub fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.stale_time
    }

    /// Whether the entry's age has passed its retention window.
    pub fn should_evict(&self) -> bool {
        self.fetched_at.elapsed() >= self.cache_time
    }

    /// When this entry leaves its retention window.
    pub(crate) fn expires_at(&self) -> Instant {
        self.fetched_at + self.cache_time
    }

    /// A copy whose fetch timestamp is back-dated far enough that
    /// [`is_stale`](Self::is_stale) reports true.
    pub(crate) fn marked_stale(mut self) -> Self {
        match self.fetched_at.checked_sub(self.stale_time) {
            Some(backdated) => self.fetched_at = backdated,
            // Start-of-process instants cannot be back-dated further; zeroing
            // the window has the same observable effect.
            None => self.stale_time = Duration::ZERO,
        }
        self
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CacheEntry");
        match &self.payload {
            Payload::Data { type_name, .. } => s.field("data", type_name),
            Payload::Error(error) => s.field("error", error),
        };
        s.field("stale_time", &self.stale_time)
            .field("cache_time", &self.cache_time)
            .finish()
    }
}
