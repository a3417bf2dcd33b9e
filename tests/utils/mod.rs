//! Test utilities and helpers for async-query-rs tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_query_rs::{LifecycleSource, QueryCache, QueryError, WindowFocusSource};
use serde::{Deserialize, Serialize};

/// Test data structures for use in tests
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestUser {
    pub id: u32,
    pub name: String,
    pub email: String,
}

impl TestUser {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: format!("User {id}"),
            email: format!("user{id}@example.com"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestPost {
    pub id: u32,
    pub title: String,
    pub user_id: u32,
}

/// Shared invocation counter for mock fetchers
#[derive(Clone, Default)]
pub struct CallCount(Arc<AtomicU32>);

impl CallCount {
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// An isolated cache plus lifecycle sources for one test
pub fn test_sources() -> (QueryCache, LifecycleSource, WindowFocusSource) {
    (
        QueryCache::new(),
        LifecycleSource::new(),
        WindowFocusSource::new(),
    )
}

/// Mock API functions for testing
pub mod mock_api {
    use super::*;

    /// Mock fetch user function
    pub async fn fetch_user(id: u32) -> Result<TestUser, QueryError> {
        // Simulate network delay
        tokio::time::sleep(Duration::from_millis(10)).await;

        if id == 0 {
            return Err(QueryError::http(404, "User not found"));
        }
        Ok(TestUser::new(id))
    }

    /// Mock fetch that always fails
    pub async fn fetch_failing() -> Result<TestUser, QueryError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Err(QueryError::network("connection refused"))
    }
}
