//! # async-query-rs
//!
//! An asynchronous data cache and fetch-coordination engine that provides:
//! - Named, typed queries backed by a shared cache
//! - Staleness and retention windows with LRU eviction
//! - Automatic background refetching and focus/resume revalidation
//! - Bounded retries with configurable backoff
//! - Infinite (paginated) queries
//! - Mutations with optimistic updates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_query_rs::{QueryEngine, QueryOptions, QueryError};
//!
//! #[derive(PartialEq)]
//! struct User {
//!     id: u32,
//!     name: String,
//! }
//!
//! async fn fetch_user(id: u32) -> Result<User, QueryError> {
//!     // Your fetch logic here
//!     Ok(User { id, name: format!("User {id}") })
//! }
//!
//! # async fn example() {
//! let user = QueryEngine::for_param("users", 1u32, fetch_user, QueryOptions::default())
//!     .expect("key derivation");
//! user.initialize().await;
//!
//! if let Some(data) = user.state().data() {
//!     println!("{}", data.name);
//! }
//! # }
//! ```
//!
//! The engine is UI-framework agnostic: subscribe to an engine's state with
//! [`QueryEngine::subscribe`] and bridge it into whatever reactive layer the
//! host application uses. Platform lifecycle signals are fed in through
//! [`LifecycleSource`] and [`WindowFocusSource`].

// Re-export core types
pub use cache::{CacheEntry, QueryCache};
pub use client::QueryClient;
pub use infinite::{
    InfiniteQueryData, InfiniteQueryEngine, InfiniteQueryOptions, InfiniteQueryState,
};
pub use lifecycle::{LifecycleSource, WindowFocusSource};
pub use listeners::Subscription;
pub use mutation::{MutationEngine, MutationOptions, MutationState};
pub use query::{QueryEngine, QueryOptions, QueryState};
pub use retry::{QueryError, RetryConfig, RetryDelay};
pub use types::{CacheStats, EntryOptions, QueryKey, QueryKeyPattern, RetentionPolicy};

// Modules
pub mod cache;
pub mod client;
pub mod infinite;
pub mod lifecycle;
pub mod listeners;
pub mod mutation;
pub mod query;
pub mod retry;
pub mod types;
