//! Mutations and Optimistic Updates
//!
//! Single-shot write operations with life-cycle hooks. Optimistic updates
//! happen in `on_mutate` by writing the query cache directly; cache writes
//! notify listeners, so every observer sees the optimistic value
//! immediately. Rollback is the caller's `on_error` restoring a snapshot or
//! invalidating the touched keys.
//!
//! Keyed ("family") mutations bind a parameter by closure capture, see
//! [`MutationEngine::for_param`]; the parameter is part of neither a cache
//! key nor the state value.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::debug;

use crate::client::QueryClient;
use crate::listeners::{ListenerSet, Subscription};
use crate::retry::{execute_with_retry, QueryError, RetryConfig};
use crate::types::QueryKeyPattern;

/// Stored mutation closure.
pub type MutationFn<T, V> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

/// Pre-mutation hook, awaited to completion before the mutation runs.
pub type OnMutateCallback<V> = Arc<dyn Fn(V) -> BoxFuture<'static, ()> + Send + Sync>;
/// Success callback with the server value and the submitted variables.
pub type OnMutationSuccess<T, V> = Arc<dyn Fn(&T, &V) + Send + Sync>;
/// Error callback with the submitted variables and the terminal error.
pub type OnMutationError<V> = Arc<dyn Fn(&V, &QueryError) + Send + Sync>;
/// Settled callback, invoked after success or error.
pub type OnMutationSettled = Arc<dyn Fn() + Send + Sync>;

/// Options for mutation configuration. One signature covers parameterless
/// mutations too: the variables type defaults to `()`.
pub struct MutationOptions<T, V = ()> {
    /// Retry configuration
    pub retry: RetryConfig,
    /// Called before the mutation executes (optimistic-update hook)
    pub on_mutate: Option<OnMutateCallback<V>>,
    /// Called on success, before `mutate` returns
    pub on_success: Option<OnMutationSuccess<T, V>>,
    /// Called on terminal failure, before `mutate` rethrows
    pub on_error: Option<OnMutationError<V>>,
    /// Called after the mutation settles either way
    pub on_settled: Option<OnMutationSettled>,
    /// Query patterns invalidated after a successful mutation
    pub invalidates: Vec<QueryKeyPattern>,
}

impl<T, V> Default for MutationOptions<T, V> {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_settled: None,
            invalidates: Vec::new(),
        }
    }
}

impl<T, V> Clone for MutationOptions<T, V> {
    fn clone(&self) -> Self {
        Self {
            retry: self.retry.clone(),
            on_mutate: self.on_mutate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
            invalidates: self.invalidates.clone(),
        }
    }
}

impl<T, V> MutationOptions<T, V> {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_on_mutate<Fut>(
        mut self,
        callback: impl Fn(V) -> Fut + Send + Sync + 'static,
    ) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_mutate = Some(Arc::new(move |variables| callback(variables).boxed()));
        self
    }

    pub fn with_on_success(mut self, callback: impl Fn(&T, &V) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn with_on_error(
        mut self,
        callback: impl Fn(&V, &QueryError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn with_on_settled(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_settled = Some(Arc::new(callback));
        self
    }

    /// Invalidate these queries after a successful mutation.
    pub fn with_invalidates(mut self, invalidates: Vec<QueryKeyPattern>) -> Self {
        self.invalidates = invalidates;
        self
    }
}

/// Reactive mutation state.
pub enum MutationState<T> {
    Idle,
    Loading,
    Success { data: Arc<T> },
    Error(QueryError),
}

impl<T> Clone for MutationState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Loading => Self::Loading,
            Self::Success { data } => Self::Success { data: data.clone() },
            Self::Error(error) => Self::Error(error.clone()),
        }
    }
}

impl<T> std::fmt::Debug for MutationState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Success { .. } => write!(f, "Success"),
            Self::Error(error) => write!(f, "Error({error})"),
        }
    }
}

impl<T: PartialEq> PartialEq for MutationState<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Idle, Self::Idle) | (Self::Loading, Self::Loading) => true,
            (Self::Success { data: a }, Self::Success { data: b }) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> MutationState<T> {
    pub fn data(&self) -> Option<Arc<T>> {
        match self {
            Self::Success { data } => Some(data.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

struct MutationEngineInner<T, V> {
    mutation_fn: MutationFn<T, V>,
    options: MutationOptions<T, V>,
    client: QueryClient,
    state: RwLock<MutationState<T>>,
    state_listeners: ListenerSet<MutationState<T>>,
}

/// Single-shot mutation state machine.
pub struct MutationEngine<T, V = ()> {
    inner: Arc<MutationEngineInner<T, V>>,
}

impl<T, V> Clone for MutationEngine<T, V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, V> MutationEngine<T, V>
where
    T: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build an engine against the process-wide client.
    pub fn new<F, Fut>(mutation_fn: F, options: MutationOptions<T, V>) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        Self::with_client(mutation_fn, options, QueryClient::global().clone())
    }

    /// Build a keyed ("family") mutation: `param` is bound by closure
    /// capture and available to the mutation function alongside each call's
    /// variables.
    pub fn for_param<Q, F, Fut>(param: Q, mutation_fn: F, options: MutationOptions<T, V>) -> Self
    where
        Q: Clone + Send + Sync + 'static,
        F: Fn(Q, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        Self::new(
            move |variables| mutation_fn(param.clone(), variables),
            options,
        )
    }

    /// Build an engine against an explicit client.
    pub fn with_client<F, Fut>(
        mutation_fn: F,
        options: MutationOptions<T, V>,
        client: QueryClient,
    ) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let mutation_fn: MutationFn<T, V> = Arc::new(move |variables| mutation_fn(variables).boxed());
        Self {
            inner: Arc::new(MutationEngineInner {
                mutation_fn,
                options,
                client,
                state: RwLock::new(MutationState::Idle),
                state_listeners: ListenerSet::new(),
            }),
        }
    }

    /// Run the mutation: `Loading` → `on_mutate` (awaited to completion) →
    /// call with retry → `Success`/`Error`. The terminal error is rethrown
    /// to the caller; `on_success`/`on_error` run before this returns.
    pub async fn mutate(&self, variables: V) -> Result<Arc<T>, QueryError> {
        let inner = &self.inner;

        inner.set_state(MutationState::Loading);
        if let Some(on_mutate) = &inner.options.on_mutate {
            on_mutate(variables.clone()).await;
        }

        let mutation_fn = inner.mutation_fn.clone();
        let call_variables = variables.clone();
        let result = execute_with_retry(
            || mutation_fn(call_variables.clone()),
            &inner.options.retry,
        )
        .await;

        match result {
            Ok(data) => {
                let data = Arc::new(data);
                inner.set_state(MutationState::Success { data: data.clone() });
                for pattern in &inner.options.invalidates {
                    inner.client.invalidate_queries(pattern);
                }
                if let Some(on_success) = &inner.options.on_success {
                    on_success(&data, &variables);
                }
                if let Some(on_settled) = &inner.options.on_settled {
                    on_settled();
                }
                Ok(data)
            }
            Err(error) => {
                debug!(%error, "mutation failed");
                inner.set_state(MutationState::Error(error.clone()));
                if let Some(on_error) = &inner.options.on_error {
                    on_error(&variables, &error);
                }
                if let Some(on_settled) = &inner.options.on_settled {
                    on_settled();
                }
                Err(error)
            }
        }
    }

    /// Return to `Idle`.
    pub fn reset(&self) {
        self.inner.set_state(MutationState::Idle);
    }

    /// Current state snapshot.
    pub fn state(&self) -> MutationState<T> {
        self.inner.state.read().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(
        &self,
        callback: impl Fn(&MutationState<T>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.state_listeners.subscribe(callback)
    }

    /// The client this mutation writes through.
    pub fn client(&self) -> &QueryClient {
        &self.inner.client
    }
}

impl<T: 'static, V> MutationEngineInner<T, V> {
    fn set_state(&self, next: MutationState<T>) {
        *self.state.write() = next.clone();
        self.state_listeners.emit(&next);
    }
}
