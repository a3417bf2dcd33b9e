//! Core types and data structures for the query system

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::QueryError;

/// Query key for identifying entries in the cache.
///
/// Keys are ordered segment lists; equality is segment-wise. Two queries
/// sharing a key share cached data, so a key must only ever be paired with
/// one payload type.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryKey {
    pub segments: Vec<String>,
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(":"))
    }
}

impl QueryKey {
    /// Create a new query key from segments
    pub fn new(segments: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            segments: segments.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Derive a key for a parameterised query: the query name plus a
    /// deterministic stringification of the parameter.
    pub fn with_param<P: Serialize>(name: impl Into<String>, param: &P) -> Result<Self, QueryError> {
        let rendered =
            serde_json::to_string(param).map_err(|e| QueryError::Serialization(e.to_string()))?;
        Ok(Self {
            segments: vec![name.into(), rendered],
        })
    }

    /// Add a segment to the key
    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Get the segments as a slice
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Check if the key is empty
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get the number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if this key matches a pattern
    pub fn matches_pattern(&self, pattern: &QueryKeyPattern) -> bool {
        match pattern {
            QueryKeyPattern::Exact(key) => self == key,
            QueryKeyPattern::Prefix(prefix) => {
                self.segments.len() >= prefix.segments.len()
                    && self.segments[..prefix.segments.len()] == prefix.segments
            }
            QueryKeyPattern::Contains(substring) => {
                self.segments.iter().any(|segment| segment.contains(substring))
            }
        }
    }
}

impl<T: ToString + fmt::Display> From<&[T]> for QueryKey {
    fn from(segments: &[T]) -> Self {
        Self::new(segments)
    }
}

impl<T: ToString + fmt::Display, const N: usize> From<[T; N]> for QueryKey {
    fn from(segments: [T; N]) -> Self {
        Self::new(segments)
    }
}

impl From<String> for QueryKey {
    fn from(segment: String) -> Self {
        Self::new([segment])
    }
}

impl From<&str> for QueryKey {
    fn from(segment: &str) -> Self {
        Self::new([segment.to_string()])
    }
}

/// Patterns for matching query keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryKeyPattern {
    /// Exact match
    Exact(QueryKey),
    /// Prefix match (key starts with this pattern)
    Prefix(QueryKey),
    /// Contains substring match
    Contains(String),
}

/// How long an engine outlives its observers.
///
/// One engine implementation covers every scope variant: a `Retained` engine
/// stays alive until explicitly disposed, an `AutoDispose` engine disposes
/// itself when its last state subscription closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    Retained,
    AutoDispose,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub stale_entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
}

impl CacheStats {
    /// Fraction of reads served from cache
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hit_count + self.miss_count;
        if reads == 0 {
            0.0
        } else {
            self.hit_count as f64 / reads as f64
        }
    }
}

/// Staleness and retention windows attached to every cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOptions {
    /// Age at which an entry is served from cache but marked for refresh
    pub stale_time: Duration,
    /// Age at which an entry is removed from the cache
    pub cache_time: Duration,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60),
            cache_time: Duration::from_secs(30 * 60),
        }
    }
}
