//! Query Options, State, and Engine
//!
//! The per-key state machine that coordinates cache reads, fetches, retries,
//! background refreshes, and focus/resume revalidation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, QueryCache};
use crate::client::QueryClient;
use crate::lifecycle::{LifecycleSource, WindowFocusSource};
use crate::listeners::{ListenerSet, Subscription};
use crate::retry::{execute_with_retry, QueryError, RetryConfig};
use crate::types::{EntryOptions, QueryKey, RetentionPolicy};

/// Stored fetch closure: the caller's async data source.
pub type QueryFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

/// Success callback
pub type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
/// Error callback
pub type ErrorCallback = Arc<dyn Fn(&QueryError) + Send + Sync>;
/// Callback invoked when this query's cache entry is evicted
pub type EvictedCallback = Arc<dyn Fn() + Send + Sync>;

/// Options for configuring a query. Immutable once handed to an engine.
pub struct QueryOptions<T> {
    /// Time before data becomes stale
    pub stale_time: Duration,
    /// Time before data is removed from cache
    pub cache_time: Duration,
    /// Refetch in the background when an engine mounts onto fresh data
    pub refetch_on_mount: bool,
    /// Refetch when the window gains focus
    pub refetch_on_window_focus: bool,
    /// Refetch when the app returns to the foreground with stale data
    pub refetch_on_app_focus: bool,
    /// Suppress interval refetches while the app is in the background
    pub pause_refetch_in_background: bool,
    /// Interval for periodic background refetching
    pub refetch_interval: Option<Duration>,
    /// Retry configuration
    pub retry: RetryConfig,
    /// Whether the query runs at all
    pub enabled: bool,
    /// Keep showing the previous value while refetching
    pub keep_previous_data: bool,
    /// Store fetch errors in the cache alongside data entries
    pub cache_errors: bool,
    /// How the engine outlives its subscribers
    pub retention: RetentionPolicy,
    /// Success callback
    pub on_success: Option<SuccessCallback<T>>,
    /// Error callback (terminal errors only, retries are invisible)
    pub on_error: Option<ErrorCallback>,
    /// Called when the cache entry for this key is evicted; replaces the
    /// default refetch reaction
    pub on_cache_evicted: Option<EvictedCallback>,
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60),
            cache_time: Duration::from_secs(30 * 60),
            refetch_on_mount: true,
            refetch_on_window_focus: false,
            refetch_on_app_focus: true,
            pause_refetch_in_background: true,
            refetch_interval: None,
            retry: RetryConfig::default(),
            enabled: true,
            keep_previous_data: false,
            cache_errors: true,
            retention: RetentionPolicy::Retained,
            on_success: None,
            on_error: None,
            on_cache_evicted: None,
        }
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            stale_time: self.stale_time,
            cache_time: self.cache_time,
            refetch_on_mount: self.refetch_on_mount,
            refetch_on_window_focus: self.refetch_on_window_focus,
            refetch_on_app_focus: self.refetch_on_app_focus,
            pause_refetch_in_background: self.pause_refetch_in_background,
            refetch_interval: self.refetch_interval,
            retry: self.retry.clone(),
            enabled: self.enabled,
            keep_previous_data: self.keep_previous_data,
            cache_errors: self.cache_errors,
            retention: self.retention,
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_cache_evicted: self.on_cache_evicted.clone(),
        }
    }
}

impl<T> QueryOptions<T> {
    pub fn with_stale_time(mut self, duration: Duration) -> Self {
        self.stale_time = duration;
        self
    }

    pub fn with_cache_time(mut self, duration: Duration) -> Self {
        self.cache_time = duration;
        self
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Disable the query
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Keep showing previous data during refetches
    pub fn keep_previous_data(mut self) -> Self {
        self.keep_previous_data = true;
        self
    }

    pub fn with_refetch_on_mount(mut self, refetch: bool) -> Self {
        self.refetch_on_mount = refetch;
        self
    }

    pub fn with_refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_window_focus = refetch;
        self
    }

    pub fn with_refetch_on_app_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_app_focus = refetch;
        self
    }

    /// Do not write terminal fetch errors into the cache
    pub fn without_error_caching(mut self) -> Self {
        self.cache_errors = false;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn with_on_error(mut self, callback: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn with_on_cache_evicted(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cache_evicted = Some(Arc::new(callback));
        self
    }

    /// The staleness/retention windows this query stamps onto cache entries.
    pub fn entry_options(&self) -> EntryOptions {
        EntryOptions {
            stale_time: self.stale_time,
            cache_time: self.cache_time,
        }
    }
}

/// Reactive query state observed by subscribers.
pub enum QueryState<T> {
    /// Not started, disabled, or evicted with nowhere to go
    Idle,
    /// First fetch in flight with nothing to show
    Loading,
    /// Data available
    Success { data: Arc<T>, fetched_at: Instant },
    /// A fetch is in flight while the previous value stays visible
    Refetching { previous_data: Arc<T>, fetched_at: Instant },
    /// Terminal fetch failure
    Error(QueryError),
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Loading => Self::Loading,
            Self::Success { data, fetched_at } => Self::Success {
                data: data.clone(),
                fetched_at: *fetched_at,
            },
            Self::Refetching { previous_data, fetched_at } => Self::Refetching {
                previous_data: previous_data.clone(),
                fetched_at: *fetched_at,
            },
            Self::Error(error) => Self::Error(error.clone()),
        }
    }
}

impl<T> std::fmt::Debug for QueryState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Success { fetched_at, .. } => {
                write!(f, "Success {{ fetched_at: {fetched_at:?} }}")
            }
            Self::Refetching { fetched_at, .. } => {
                write!(f, "Refetching {{ fetched_at: {fetched_at:?} }}")
            }
            Self::Error(error) => write!(f, "Error({error})"),
        }
    }
}

impl<T: PartialEq> PartialEq for QueryState<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Idle, Self::Idle) | (Self::Loading, Self::Loading) => true,
            (
                Self::Success { data: a, fetched_at: at_a },
                Self::Success { data: b, fetched_at: at_b },
            ) => a == b && at_a == at_b,
            (
                Self::Refetching { previous_data: a, fetched_at: at_a },
                Self::Refetching { previous_data: b, fetched_at: at_b },
            ) => a == b && at_a == at_b,
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> QueryState<T> {
    /// The visible value, present in `Success` and `Refetching`.
    pub fn data(&self) -> Option<Arc<T>> {
        match self {
            Self::Success { data, .. } => Some(data.clone()),
            Self::Refetching { previous_data, .. } => Some(previous_data.clone()),
            _ => None,
        }
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        match self {
            Self::Success { fetched_at, .. } | Self::Refetching { fetched_at, .. } => {
                Some(*fetched_at)
            }
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

    pub fn is_refetching(&self) -> bool {
        matches!(self, Self::Refetching { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

struct EngineTasks {
    interval: Option<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

pub(crate) struct EngineInner<T> {
    key: QueryKey,
    query_fn: QueryFn<T>,
    options: QueryOptions<T>,
    cache: QueryCache,
    state: RwLock<QueryState<T>>,
    state_listeners: ListenerSet<QueryState<T>>,
    is_fetching: AtomicBool,
    is_refetch_paused: AtomicBool,
    is_disposed: AtomicBool,
    is_initialized: AtomicBool,
    tasks: Mutex<EngineTasks>,
}

/// Per-key reactive query engine.
///
/// Cloning yields another handle to the same engine. Disposal detaches every
/// cache/lifecycle listener and cancels the interval task; results of a fetch
/// still in flight are written to the cache but no longer observed here.
pub struct QueryEngine<T> {
    inner: Arc<EngineInner<T>>,
}

impl<T> Clone for QueryEngine<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: PartialEq + Send + Sync + 'static> QueryEngine<T> {
    /// Build an engine against the process-wide client and lifecycle sources.
    pub fn new<F, Fut>(key: impl Into<QueryKey>, query_fn: F, options: QueryOptions<T>) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        Self::with_sources(
            key,
            query_fn,
            options,
            QueryClient::global().cache().clone(),
            LifecycleSource::global(),
            WindowFocusSource::global(),
        )
    }

    /// Build an engine for a parameterised query family. The key is derived
    /// from the query name and a deterministic rendering of the parameter;
    /// the parameter itself is captured into the fetch closure.
    pub fn for_param<P, F, Fut>(
        name: &str,
        param: P,
        query_fn: F,
        options: QueryOptions<T>,
    ) -> Result<Self, QueryError>
    where
        P: Serialize + Clone + Send + Sync + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let key = QueryKey::with_param(name, &param)?;
        Ok(Self::new(key, move || query_fn(param.clone()), options))
    }

    /// Build an engine against explicit cache and lifecycle sources.
    pub fn with_sources<F, Fut>(
        key: impl Into<QueryKey>,
        query_fn: F,
        options: QueryOptions<T>,
        cache: QueryCache,
        lifecycle: &LifecycleSource,
        focus: &WindowFocusSource,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let key = key.into();
        let query_fn: QueryFn<T> = Arc::new(move || query_fn().boxed());

        let inner = Arc::new(EngineInner {
            key: key.clone(),
            query_fn,
            options,
            cache,
            state: RwLock::new(QueryState::Idle),
            state_listeners: ListenerSet::new(),
            is_fetching: AtomicBool::new(false),
            is_refetch_paused: AtomicBool::new(false),
            is_disposed: AtomicBool::new(false),
            is_initialized: AtomicBool::new(false),
            tasks: Mutex::new(EngineTasks { interval: None, subscriptions: Vec::new() }),
        });

        EngineInner::attach(&inner, lifecycle, focus);
        Self { inner }
    }

    /// Resolve the initial state: serve fresh cache synchronously, show
    /// stale data while revalidating in the background, or run the first
    /// fetch inline. Idempotent.
    pub async fn initialize(&self) {
        let inner = &self.inner;
        if inner.is_initialized.swap(true, Ordering::SeqCst) || inner.is_disposed.load(Ordering::SeqCst)
        {
            return;
        }
        if !inner.options.enabled {
            inner.set_state(QueryState::Idle);
            return;
        }

        if let Some(entry) = inner.cache.get(&inner.key) {
            if let Some(data) = entry.data::<T>() {
                if !entry.is_stale() {
                    inner.set_state(QueryState::Success {
                        data,
                        fetched_at: entry.fetched_at(),
                    });
                    if inner.options.refetch_on_mount {
                        EngineInner::spawn_fetch(inner, true, true);
                    }
                } else {
                    // Stale hit: show it, revalidate behind it.
                    let fetched_at = entry.fetched_at();
                    let state = if inner.options.keep_previous_data {
                        QueryState::Success { data, fetched_at }
                    } else {
                        QueryState::Refetching { previous_data: data, fetched_at }
                    };
                    inner.set_state(state);
                    EngineInner::spawn_fetch(inner, true, true);
                }
                return;
            }
            if let Some(error) = entry.error() {
                if !entry.is_stale() {
                    inner.set_state(QueryState::Error(error.clone()));
                    return;
                }
            }
        }

        EngineInner::run_fetch(inner.clone(), true, false).await;
    }

    /// Current state snapshot.
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.read().clone()
    }

    /// Subscribe to state changes. With `RetentionPolicy::AutoDispose`, the
    /// engine disposes itself when its last subscription closes.
    pub fn subscribe(
        &self,
        callback: impl Fn(&QueryState<T>) + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.inner.state_listeners.subscribe(callback);
        let weak = Arc::downgrade(&self.inner);
        sub.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.options.retention == RetentionPolicy::AutoDispose
                    && inner.state_listeners.is_empty()
                {
                    EngineInner::dispose(&inner);
                }
            }
        })
    }

    /// Force a fetch. Shows `Refetching`/`Loading` while in flight; a no-op
    /// when another fetch on this engine is already running.
    pub async fn refetch(&self) {
        EngineInner::run_fetch(self.inner.clone(), true, false).await;
    }

    /// Fetch without disturbing the visible state; failures are logged only.
    pub fn refetch_background(&self) {
        EngineInner::spawn_fetch(&self.inner, true, true);
    }

    /// Drop the cache entry for this key, then fetch.
    pub async fn refresh(&self) {
        self.inner.cache.remove(&self.inner.key, false);
        EngineInner::run_fetch(self.inner.clone(), true, false).await;
    }

    /// Write a value through to the cache and show it immediately.
    pub fn set_data(&self, data: T) {
        let inner = &self.inner;
        let data = Arc::new(data);
        let fetched_at = Instant::now();
        inner.set_state(QueryState::Success { data: data.clone(), fetched_at });
        let entry = CacheEntry::with_shared_data(data, inner.options.entry_options())
            .fetched_at_instant(fetched_at);
        inner.cache.set(&inner.key, entry, true);
    }

    /// Read this key's cached value, if any.
    pub fn cached_data(&self) -> Option<Arc<T>> {
        self.inner.cache.get_data::<T>(&self.inner.key)
    }

    /// Resolve to a value: cached data for a disabled query (or
    /// `QueryError::Disabled` without one), otherwise the outcome of the
    /// initial resolution.
    pub async fn ensure_data(&self) -> Result<Arc<T>, QueryError> {
        let inner = &self.inner;
        if !inner.options.enabled {
            return inner
                .cache
                .get_data::<T>(&inner.key)
                .ok_or(QueryError::Disabled);
        }

        self.initialize().await;
        if let Some(data) = self.state().data() {
            return Ok(data);
        }
        self.refetch().await;
        match self.state() {
            QueryState::Error(error) => Err(error),
            state => match state.data() {
                Some(data) => Ok(data),
                None => self
                    .cached_data()
                    .ok_or_else(|| QueryError::custom("query produced no value")),
            },
        }
    }

    /// Suppress interval refetch ticks.
    pub fn pause_refetch(&self) {
        self.inner.is_refetch_paused.store(true, Ordering::SeqCst);
    }

    /// Resume interval refetch ticks.
    pub fn resume_refetch(&self) {
        self.inner.is_refetch_paused.store(false, Ordering::SeqCst);
    }

    pub fn is_refetch_paused(&self) -> bool {
        self.inner.is_refetch_paused.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed.load(Ordering::SeqCst)
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    /// Detach listeners, cancel timers, and drop all future state emissions.
    pub fn dispose(&self) {
        EngineInner::dispose(&self.inner);
    }
}

impl<T: PartialEq + Send + Sync + 'static> EngineInner<T> {
    /// Wire the engine into its collaborators: cache listener, lifecycle
    /// resume/pause, window focus, interval timer.
    fn attach(this: &Arc<Self>, lifecycle: &LifecycleSource, focus: &WindowFocusSource) {
        let mut subscriptions = Vec::new();

        let weak = Arc::downgrade(this);
        subscriptions.push(this.cache.add_listener(&this.key, move |update| {
            if let Some(inner) = weak.upgrade() {
                EngineInner::reconcile(&inner, update);
            }
        }));

        let weak = Arc::downgrade(this);
        subscriptions.push(lifecycle.on_resume(move || {
            if let Some(inner) = weak.upgrade() {
                EngineInner::handle_resume(&inner);
            }
        }));

        let weak = Arc::downgrade(this);
        subscriptions.push(lifecycle.on_pause(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_pause();
            }
        }));

        if this.options.refetch_on_window_focus && focus.is_supported() {
            let weak = Arc::downgrade(this);
            subscriptions.push(focus.on_focus(move || {
                if let Some(inner) = weak.upgrade() {
                    EngineInner::handle_focus(&inner);
                }
            }));
        }

        let mut tasks = this.tasks.lock();
        tasks.subscriptions = subscriptions;
        drop(tasks);

        if this.options.enabled {
            if let Some(interval) = this.options.refetch_interval {
                EngineInner::start_interval(this, interval);
            }
        }
    }

    fn start_interval(this: &Arc<Self>, interval: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %this.key, "no runtime available; interval refetch disabled");
            return;
        };

        let weak = Arc::downgrade(this);
        let task = runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.is_disposed.load(Ordering::SeqCst) {
                    break;
                }
                if inner.is_refetch_paused.load(Ordering::SeqCst) {
                    continue;
                }
                EngineInner::run_fetch(inner, true, true).await;
            }
        });
        this.tasks.lock().interval = Some(task);
    }

    fn set_state(&self, next: QueryState<T>) {
        if self.is_disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.state.write() = next.clone();
        self.state_listeners.emit(&next);
    }

    /// Apply a cache notification for this key. The engine publishes state
    /// before its own cache write, so the echo of that write fails the
    /// equality check below and peer commits are never suppressed.
    fn reconcile(this: &Arc<Self>, update: &Option<CacheEntry>) {
        if this.is_disposed.load(Ordering::SeqCst) {
            return;
        }

        match update {
            Some(entry) => {
                let Some(data) = entry.data::<T>() else { return };
                let differs = this
                    .state
                    .read()
                    .data()
                    .map_or(true, |current| *current != *data);
                if differs {
                    this.set_state(QueryState::Success {
                        data,
                        fetched_at: entry.fetched_at(),
                    });
                }
            }
            None => {
                if let Some(callback) = &this.options.on_cache_evicted {
                    callback();
                } else if tokio::runtime::Handle::try_current().is_ok() {
                    EngineInner::spawn_fetch(this, true, false);
                } else {
                    this.set_state(QueryState::Idle);
                }
            }
        }
    }

    fn handle_resume(this: &Arc<Self>) {
        this.is_refetch_paused.store(false, Ordering::SeqCst);
        if !this.options.refetch_on_app_focus || !this.options.enabled {
            return;
        }
        if this.cache_entry_is_stale() {
            EngineInner::spawn_fetch(this, true, true);
        }
    }

    fn handle_pause(&self) {
        if self.options.pause_refetch_in_background {
            self.is_refetch_paused.store(true, Ordering::SeqCst);
        }
    }

    fn handle_focus(this: &Arc<Self>) {
        if !this.options.enabled {
            return;
        }
        if this.cache_entry_is_stale() {
            EngineInner::spawn_fetch(this, true, true);
        }
    }

    fn cache_entry_is_stale(&self) -> bool {
        self.cache
            .peek(&self.key)
            .map_or(false, |entry| entry.is_stale())
    }

    fn spawn_fetch(this: &Arc<Self>, force_remote: bool, background: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %this.key, "no runtime available; dropping scheduled fetch");
            return;
        };
        let inner = this.clone();
        runtime.spawn(async move {
            EngineInner::run_fetch(inner, force_remote, background).await;
        });
    }

    /// One pass of the fetch algorithm. At most one runs per engine; a
    /// concurrent call observes the in-flight guard and returns.
    async fn run_fetch(this: Arc<Self>, force_remote: bool, background: bool) {
        if this.is_disposed.load(Ordering::SeqCst) || !this.options.enabled {
            return;
        }
        if this.is_fetching.swap(true, Ordering::SeqCst) {
            return;
        }
        this.do_fetch(force_remote, background).await;
        this.is_fetching.store(false, Ordering::SeqCst);
    }

    async fn do_fetch(&self, force_remote: bool, background: bool) {
        let entry = if force_remote { None } else { self.cache.get(&self.key) };

        if let Some(entry) = &entry {
            if !entry.is_stale() {
                if let Some(data) = entry.data::<T>() {
                    self.set_state(QueryState::Success {
                        data,
                        fetched_at: entry.fetched_at(),
                    });
                    return;
                }
            }
        }

        if !background {
            let previous = {
                let state = self.state.read();
                state.data().zip(state.fetched_at())
            }
            .or_else(|| {
                entry
                    .as_ref()
                    .and_then(|e| e.data::<T>().map(|d| (d, e.fetched_at())))
            });
            match previous {
                Some((previous_data, fetched_at)) if self.options.keep_previous_data => {
                    self.set_state(QueryState::Refetching { previous_data, fetched_at });
                }
                _ => self.set_state(QueryState::Loading),
            }
        }

        let query_fn = self.query_fn.clone();
        let result = execute_with_retry(|| query_fn(), &self.options.retry).await;

        match result {
            Ok(data) => {
                let data = Arc::new(data);
                let fetched_at = Instant::now();
                debug!(key = %self.key, "query fetch succeeded");
                self.set_state(QueryState::Success { data: data.clone(), fetched_at });
                let entry = CacheEntry::with_shared_data(data.clone(), self.options.entry_options())
                    .fetched_at_instant(fetched_at);
                self.cache.set(&self.key, entry, true);
                if let Some(callback) = &self.options.on_success {
                    callback(&data);
                }
            }
            Err(error) => {
                if background {
                    warn!(key = %self.key, %error, "background refetch failed; keeping visible data");
                    let restored = {
                        let state = self.state.read();
                        match &*state {
                            QueryState::Refetching { previous_data, fetched_at } => {
                                Some(QueryState::Success {
                                    data: previous_data.clone(),
                                    fetched_at: *fetched_at,
                                })
                            }
                            _ => None,
                        }
                    };
                    if let Some(state) = restored {
                        self.set_state(state);
                    }
                } else {
                    if self.options.cache_errors {
                        self.cache
                            .set_error(&self.key, error.clone(), self.options.entry_options());
                    }
                    self.set_state(QueryState::Error(error.clone()));
                    if let Some(callback) = &self.options.on_error {
                        callback(&error);
                    }
                }
            }
        }
    }

    fn dispose(this: &Arc<Self>) {
        if this.is_disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(key = %this.key, "disposing query engine");
        let mut tasks = this.tasks.lock();
        if let Some(interval) = tasks.interval.take() {
            interval.abort();
        }
        tasks.subscriptions.clear();
        drop(tasks);
        this.state_listeners.clear();
    }
}

impl<T> Drop for EngineInner<T> {
    fn drop(&mut self) {
        if let Some(interval) = self.tasks.lock().interval.take() {
            interval.abort();
        }
    }
}
