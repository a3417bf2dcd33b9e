//! Infinite Queries
//!
//! Pagination-aware engine variant. The cached value is the whole page list,
//! stored atomically under one key and extended by successive fetches.

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
use crate::query::QueryOptions;
use crate::retry::{execute_with_retry, QueryError};
use crate::types::{QueryKey, RetentionPolicy};

/// Stored page fetcher: maps a page parameter to one page of data.
pub type PageFn<T, P> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

/// Derives the parameter for the page adjacent to `page` given every loaded
/// page. Returning `None` terminates that direction.
pub type PageParamFn<T, P> = Arc<dyn Fn(&T, &[Arc<T>]) -> Option<P> + Send + Sync>;

/// Options for configuring an infinite query.
pub struct InfiniteQueryOptions<T, P> {
    /// The base query configuration (windows, retry, revalidation policy,
    /// callbacks over the whole page list)
    pub base: QueryOptions<InfiniteQueryData<T>>,
    /// Parameter for the first page
    pub initial_page_param: P,
    /// Derives the next page's parameter from the last page
    pub get_next_page_param: PageParamFn<T, P>,
    /// Derives the previous page's parameter from the first page
    pub get_previous_page_param: Option<PageParamFn<T, P>>,
}

impl<T, P> Clone for InfiniteQueryOptions<T, P>
where
    P: Clone,
{
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            initial_page_param: self.initial_page_param.clone(),
            get_next_page_param: self.get_next_page_param.clone(),
            get_previous_page_param: self.get_previous_page_param.clone(),
        }
    }
}

impl<T, P> InfiniteQueryOptions<T, P> {
    pub fn new(
        initial_page_param: P,
        get_next_page_param: impl Fn(&T, &[Arc<T>]) -> Option<P> + Send + Sync + 'static,
    ) -> Self {
        Self {
            base: QueryOptions::default(),
            initial_page_param,
            get_next_page_param: Arc::new(get_next_page_param),
            get_previous_page_param: None,
        }
    }

    pub fn with_previous_page_param(
        mut self,
        get_previous_page_param: impl Fn(&T, &[Arc<T>]) -> Option<P> + Send + Sync + 'static,
    ) -> Self {
        self.get_previous_page_param = Some(Arc::new(get_previous_page_param));
        self
    }

    pub fn with_base(mut self, base: QueryOptions<InfiniteQueryData<T>>) -> Self {
        self.base = base;
        self
    }
}

/// The whole loaded page list, cached under one key.
pub struct InfiniteQueryData<T> {
    pub pages: Vec<Arc<T>>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub fetched_at: Instant,
}

impl<T> Clone for InfiniteQueryData<T> {
    fn clone(&self) -> Self {
        Self {
            pages: self.pages.clone(),
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
            fetched_at: self.fetched_at,
        }
    }
}

impl<T: PartialEq> PartialEq for InfiniteQueryData<T> {
    fn eq(&self, other: &Self) -> bool {
        self.has_next_page == other.has_next_page
            && self.has_previous_page == other.has_previous_page
            && self.pages.len() == other.pages.len()
            && self
                .pages
                .iter()
                .zip(other.pages.iter())
                .all(|(a, b)| **a == **b)
    }
}

impl<T> std::fmt::Debug for InfiniteQueryData<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfiniteQueryData")
            .field("pages", &self.pages.len())
            .field("has_next_page", &self.has_next_page)
            .field("has_previous_page", &self.has_previous_page)
            .finish()
    }
}

impl<T> InfiniteQueryData<T> {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn first_page(&self) -> Option<&Arc<T>> {
        self.pages.first()
    }

    pub fn last_page(&self) -> Option<&Arc<T>> {
        self.pages.last()
    }
}

/// Reactive infinite-query state.
pub enum InfiniteQueryState<T> {
    Idle,
    Loading,
    Success { data: InfiniteQueryData<T> },
    Refetching { data: InfiniteQueryData<T> },
    FetchingNextPage { data: InfiniteQueryData<T> },
    FetchingPreviousPage { data: InfiniteQueryData<T> },
    Error(QueryError),
}

impl<T> Clone for InfiniteQueryState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Loading => Self::Loading,
            Self::Success { data } => Self::Success { data: data.clone() },
            Self::Refetching { data } => Self::Refetching { data: data.clone() },
            Self::FetchingNextPage { data } => Self::FetchingNextPage { data: data.clone() },
            Self::FetchingPreviousPage { data } => {
                Self::FetchingPreviousPage { data: data.clone() }
            }
            Self::Error(error) => Self::Error(error.clone()),
        }
    }
}

impl<T> std::fmt::Debug for InfiniteQueryState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Success { data } => write!(f, "Success({} pages)", data.page_count()),
            Self::Refetching { data } => write!(f, "Refetching({} pages)", data.page_count()),
            Self::FetchingNextPage { data } => {
                write!(f, "FetchingNextPage({} pages)", data.page_count())
            }
            Self::FetchingPreviousPage { data } => {
                write!(f, "FetchingPreviousPage({} pages)", data.page_count())
            }
            Self::Error(error) => write!(f, "Error({error})"),
        }
    }
}

impl<T> InfiniteQueryState<T> {
    /// The visible page list, present in every non-terminal fetching state.
    pub fn data(&self) -> Option<&InfiniteQueryData<T>> {
        match self {
            Self::Success { data }
            | Self::Refetching { data }
            | Self::FetchingNextPage { data }
            | Self::FetchingPreviousPage { data } => Some(data),
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

    pub fn is_fetching_next_page(&self) -> bool {
        matches!(self, Self::FetchingNextPage { .. })
    }

    pub fn is_fetching_previous_page(&self) -> bool {
        matches!(self, Self::FetchingPreviousPage { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

struct EngineTasks {
    interval: Option<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

struct InfiniteEngineInner<T, P> {
    key: QueryKey,
    page_fn: PageFn<T, P>,
    options: InfiniteQueryOptions<T, P>,
    cache: QueryCache,
    state: RwLock<InfiniteQueryState<T>>,
    state_listeners: ListenerSet<InfiniteQueryState<T>>,
    is_fetching: AtomicBool,
    is_refetch_paused: AtomicBool,
    is_disposed: AtomicBool,
    is_initialized: AtomicBool,
    tasks: Mutex<EngineTasks>,
}

/// Per-key infinite query engine.
pub struct InfiniteQueryEngine<T, P> {
    inner: Arc<InfiniteEngineInner<T, P>>,
}

impl<T, P> Clone for InfiniteQueryEngine<T, P> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, P> InfiniteQueryEngine<T, P>
where
    T: PartialEq + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// Build an engine against the process-wide client and lifecycle sources.
    pub fn new<F, Fut>(
        key: impl Into<QueryKey>,
        page_fn: F,
        options: InfiniteQueryOptions<T, P>,
    ) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        Self::with_sources(
            key,
            page_fn,
            options,
            QueryClient::global().cache().clone(),
            LifecycleSource::global(),
            WindowFocusSource::global(),
        )
    }

    /// Build an engine for a parameterised infinite query family.
    pub fn for_param<Q, F, Fut>(
        name: &str,
        param: Q,
        page_fn: F,
        options: InfiniteQueryOptions<T, P>,
    ) -> Result<Self, QueryError>
    where
        Q: Serialize + Clone + Send + Sync + 'static,
        F: Fn(Q, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let key = QueryKey::with_param(name, &param)?;
        Ok(Self::new(
            key,
            move |page_param| page_fn(param.clone(), page_param),
            options,
        ))
    }

    /// Build an engine against explicit cache and lifecycle sources.
    pub fn with_sources<F, Fut>(
        key: impl Into<QueryKey>,
        page_fn: F,
        options: InfiniteQueryOptions<T, P>,
        cache: QueryCache,
        lifecycle: &LifecycleSource,
        focus: &WindowFocusSource,
    ) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let key = key.into();
        let page_fn: PageFn<T, P> = Arc::new(move |param| page_fn(param).boxed());

        let inner = Arc::new(InfiniteEngineInner {
            key,
            page_fn,
            options,
            cache,
            state: RwLock::new(InfiniteQueryState::Idle),
            state_listeners: ListenerSet::new(),
            is_fetching: AtomicBool::new(false),
            is_refetch_paused: AtomicBool::new(false),
            is_disposed: AtomicBool::new(false),
            is_initialized: AtomicBool::new(false),
            tasks: Mutex::new(EngineTasks { interval: None, subscriptions: Vec::new() }),
        });

        InfiniteEngineInner::attach(&inner, lifecycle, focus);
        Self { inner }
    }

    /// Resolve the initial state from cache or fetch the first page.
    /// Idempotent.
    pub async fn initialize(&self) {
        let inner = &self.inner;
        if inner.is_initialized.swap(true, Ordering::SeqCst)
            || inner.is_disposed.load(Ordering::SeqCst)
        {
            return;
        }
        if !inner.options.base.enabled {
            inner.set_state(InfiniteQueryState::Idle);
            return;
        }

        if let Some(entry) = inner.cache.get(&inner.key) {
            if let Some(data) = entry.data::<InfiniteQueryData<T>>() {
                let data = (*data).clone();
                if !entry.is_stale() {
                    inner.set_state(InfiniteQueryState::Success { data });
                    if inner.options.base.refetch_on_mount {
                        InfiniteEngineInner::spawn_refetch(inner, true);
                    }
                } else {
                    let state = if inner.options.base.keep_previous_data {
                        InfiniteQueryState::Success { data }
                    } else {
                        InfiniteQueryState::Refetching { data }
                    };
                    inner.set_state(state);
                    InfiniteEngineInner::spawn_refetch(inner, true);
                }
                return;
            }
            if let Some(error) = entry.error() {
                if !entry.is_stale() {
                    inner.set_state(InfiniteQueryState::Error(error.clone()));
                    return;
                }
            }
        }

        InfiniteEngineInner::run_refetch(inner.clone(), false).await;
    }

    /// Current state snapshot.
    pub fn state(&self) -> InfiniteQueryState<T> {
        self.inner.state.read().clone()
    }

    /// Subscribe to state changes. With `RetentionPolicy::AutoDispose`, the
    /// engine disposes itself when its last subscription closes.
    pub fn subscribe(
        &self,
        callback: impl Fn(&InfiniteQueryState<T>) + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.inner.state_listeners.subscribe(callback);
        let weak = Arc::downgrade(&self.inner);
        sub.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.options.base.retention == RetentionPolicy::AutoDispose
                    && inner.state_listeners.is_empty()
                {
                    InfiniteEngineInner::dispose(&inner);
                }
            }
        })
    }

    /// Append the next page. A no-op unless the engine is showing `Success`
    /// with a next page available; a failure leaves the page list and cache
    /// untouched and returns the error.
    pub async fn fetch_next_page(&self) -> Result<(), QueryError> {
        let inner = &self.inner;
        if inner.is_disposed.load(Ordering::SeqCst) || !inner.options.base.enabled {
            return Ok(());
        }

        let current = match &*inner.state.read() {
            InfiniteQueryState::Success { data } if data.has_next_page => data.clone(),
            _ => return Ok(()),
        };
        let param = match current.last_page() {
            Some(last) => (inner.options.get_next_page_param)(last, &current.pages),
            None => None,
        };
        let Some(param) = param else { return Ok(()) };

        if inner.is_fetching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.set_state(InfiniteQueryState::FetchingNextPage { data: current.clone() });

        let page_fn = inner.page_fn.clone();
        let result =
            execute_with_retry(|| page_fn(param.clone()), &inner.options.base.retry).await;

        let outcome = match result {
            Ok(page) => {
                let page = Arc::new(page);
                let mut pages = current.pages.clone();
                pages.push(page.clone());

                let has_next_page = (inner.options.get_next_page_param)(&page, &pages).is_some();
                let has_previous_page = inner.has_previous(&pages);
                let data = InfiniteQueryData {
                    pages,
                    has_next_page,
                    has_previous_page,
                    fetched_at: Instant::now(),
                };
                inner.publish(data);
                Ok(())
            }
            Err(error) => {
                debug!(key = %inner.key, %error, "fetch_next_page failed; page list unchanged");
                inner.set_state(InfiniteQueryState::Success { data: current });
                if let Some(callback) = &inner.options.base.on_error {
                    callback(&error);
                }
                Err(error)
            }
        };

        inner.is_fetching.store(false, Ordering::SeqCst);
        outcome
    }

    /// Prepend the previous page; symmetric to
    /// [`fetch_next_page`](Self::fetch_next_page).
    pub async fn fetch_previous_page(&self) -> Result<(), QueryError> {
        let inner = &self.inner;
        if inner.is_disposed.load(Ordering::SeqCst) || !inner.options.base.enabled {
            return Ok(());
        }
        let Some(get_previous) = inner.options.get_previous_page_param.clone() else {
            return Ok(());
        };

        let current = match &*inner.state.read() {
            InfiniteQueryState::Success { data } if data.has_previous_page => data.clone(),
            _ => return Ok(()),
        };
        let param = match current.first_page() {
            Some(first) => get_previous(first, &current.pages),
            None => None,
        };
        let Some(param) = param else { return Ok(()) };

        if inner.is_fetching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.set_state(InfiniteQueryState::FetchingPreviousPage { data: current.clone() });

        let page_fn = inner.page_fn.clone();
        let result =
            execute_with_retry(|| page_fn(param.clone()), &inner.options.base.retry).await;

        let outcome = match result {
            Ok(page) => {
                let page = Arc::new(page);
                let mut pages = current.pages.clone();
                pages.insert(0, page.clone());

                let has_previous_page = get_previous(&page, &pages).is_some();
                let data = InfiniteQueryData {
                    pages,
                    has_next_page: current.has_next_page,
                    has_previous_page,
                    fetched_at: Instant::now(),
                };
                inner.publish(data);
                Ok(())
            }
            Err(error) => {
                debug!(key = %inner.key, %error, "fetch_previous_page failed; page list unchanged");
                inner.set_state(InfiniteQueryState::Success { data: current });
                if let Some(callback) = &inner.options.base.on_error {
                    callback(&error);
                }
                Err(error)
            }
        };

        inner.is_fetching.store(false, Ordering::SeqCst);
        outcome
    }

    /// Re-fetch as many pages as are currently loaded, chaining page
    /// parameters from the initial one.
    pub async fn refetch(&self) {
        InfiniteEngineInner::run_refetch(self.inner.clone(), false).await;
    }

    /// Refetch without disturbing visible state; failures are logged only.
    pub fn refetch_background(&self) {
        InfiniteEngineInner::spawn_refetch(&self.inner, true);
    }

    /// Read this key's cached page list, if any.
    pub fn cached_data(&self) -> Option<InfiniteQueryData<T>> {
        self.inner
            .cache
            .get_data::<InfiniteQueryData<T>>(&self.inner.key)
            .map(|data| (*data).clone())
    }

    /// Suppress interval refetch ticks.
    pub fn pause_refetch(&self) {
        self.inner.is_refetch_paused.store(true, Ordering::SeqCst);
    }

    /// Resume interval refetch ticks.
    pub fn resume_refetch(&self) {
        self.inner.is_refetch_paused.store(false, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed.load(Ordering::SeqCst)
    }

    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    /// Detach listeners, cancel timers, and drop all future state emissions.
    pub fn dispose(&self) {
        InfiniteEngineInner::dispose(&self.inner);
    }
}

impl<T, P> InfiniteEngineInner<T, P>
where
    T: PartialEq + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn attach(this: &Arc<Self>, lifecycle: &LifecycleSource, focus: &WindowFocusSource) {
        let mut subscriptions = Vec::new();

        let weak = Arc::downgrade(this);
        subscriptions.push(this.cache.add_listener(&this.key, move |update| {
            if let Some(inner) = weak.upgrade() {
                InfiniteEngineInner::reconcile(&inner, update);
            }
        }));

        let weak = Arc::downgrade(this);
        subscriptions.push(lifecycle.on_resume(move || {
            if let Some(inner) = weak.upgrade() {
                inner.is_refetch_paused.store(false, Ordering::SeqCst);
                if inner.options.base.refetch_on_app_focus && inner.stale_in_cache() {
                    InfiniteEngineInner::spawn_refetch(&inner, true);
                }
            }
        }));

        let weak = Arc::downgrade(this);
        subscriptions.push(lifecycle.on_pause(move || {
            if let Some(inner) = weak.upgrade() {
                if inner.options.base.pause_refetch_in_background {
                    inner.is_refetch_paused.store(true, Ordering::SeqCst);
                }
            }
        }));

        if this.options.base.refetch_on_window_focus && focus.is_supported() {
            let weak = Arc::downgrade(this);
            subscriptions.push(focus.on_focus(move || {
                if let Some(inner) = weak.upgrade() {
                    if inner.stale_in_cache() {
                        InfiniteEngineInner::spawn_refetch(&inner, true);
                    }
                }
            }));
        }

        let mut tasks = this.tasks.lock();
        tasks.subscriptions = subscriptions;
        drop(tasks);

        if this.options.base.enabled {
            if let Some(interval) = this.options.base.refetch_interval {
                InfiniteEngineInner::start_interval(this, interval);
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
                InfiniteEngineInner::run_refetch(inner, true).await;
            }
        });
        this.tasks.lock().interval = Some(task);
    }

    fn set_state(&self, next: InfiniteQueryState<T>) {
        if self.is_disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.state.write() = next.clone();
        self.state_listeners.emit(&next);
    }

    /// Publish a new page list: state first, then write-through so peers
    /// reconcile against a value we already show.
    fn publish(&self, data: InfiniteQueryData<T>) {
        self.set_state(InfiniteQueryState::Success { data: data.clone() });
        let entry = CacheEntry::with_data(data, self.options.base.entry_options());
        self.cache.set(&self.key, entry, true);
    }

    fn has_previous(&self, pages: &[Arc<T>]) -> bool {
        match (&self.options.get_previous_page_param, pages.first()) {
            (Some(get_previous), Some(first)) => get_previous(first, pages).is_some(),
            _ => false,
        }
    }

    fn stale_in_cache(&self) -> bool {
        self.cache
            .peek(&self.key)
            .map_or(false, |entry| entry.is_stale())
    }

    fn reconcile(this: &Arc<Self>, update: &Option<CacheEntry>) {
        if this.is_disposed.load(Ordering::SeqCst) {
            return;
        }

        match update {
            Some(entry) => {
                let Some(data) = entry.data::<InfiniteQueryData<T>>() else { return };
                let differs = this
                    .state
                    .read()
                    .data()
                    .map_or(true, |current| *current != *data);
                if differs {
                    this.set_state(InfiniteQueryState::Success { data: (*data).clone() });
                }
            }
            None => {
                if let Some(callback) = &this.options.base.on_cache_evicted {
                    callback();
                } else if tokio::runtime::Handle::try_current().is_ok() {
                    InfiniteEngineInner::spawn_refetch(this, false);
                } else {
                    this.set_state(InfiniteQueryState::Idle);
                }
            }
        }
    }

    fn spawn_refetch(this: &Arc<Self>, background: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %this.key, "no runtime available; dropping scheduled refetch");
            return;
        };
        let inner = this.clone();
        runtime.spawn(async move {
            InfiniteEngineInner::run_refetch(inner, background).await;
        });
    }

    /// Re-fetch the currently loaded number of pages (at least one),
    /// chaining parameters from `initial_page_param`.
    async fn run_refetch(this: Arc<Self>, background: bool) {
        if this.is_disposed.load(Ordering::SeqCst) || !this.options.base.enabled {
            return;
        }
        if this.is_fetching.swap(true, Ordering::SeqCst) {
            return;
        }

        let visible = this.state.read().data().cloned().or_else(|| {
            this.cache
                .peek(&this.key)
                .and_then(|entry| entry.data::<InfiniteQueryData<T>>())
                .map(|data| (*data).clone())
        });
        let target_pages = visible.as_ref().map_or(1, |data| data.page_count().max(1));

        if !background {
            match &visible {
                Some(data) if this.options.base.keep_previous_data => {
                    this.set_state(InfiniteQueryState::Refetching { data: data.clone() });
                }
                _ => this.set_state(InfiniteQueryState::Loading),
            }
        }

        let mut pages: Vec<Arc<T>> = Vec::with_capacity(target_pages);
        let mut param = Some(this.options.initial_page_param.clone());
        let mut failure: Option<QueryError> = None;

        for _ in 0..target_pages {
            let Some(current_param) = param.clone() else { break };
            let page_fn = this.page_fn.clone();
            match execute_with_retry(|| page_fn(current_param.clone()), &this.options.base.retry)
                .await
            {
                Ok(page) => {
                    let page = Arc::new(page);
                    pages.push(page.clone());
                    param = (this.options.get_next_page_param)(&page, &pages);
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        match failure {
            None => {
                let data = InfiniteQueryData {
                    has_next_page: param.is_some(),
                    has_previous_page: this.has_previous(&pages),
                    pages,
                    fetched_at: Instant::now(),
                };
                this.publish(data.clone());
                if let Some(callback) = &this.options.base.on_success {
                    callback(&data);
                }
            }
            Some(error) => {
                if background {
                    warn!(key = %this.key, %error, "background refetch failed; keeping visible pages");
                    if let Some(data) = visible {
                        let showing_spinner =
                            matches!(&*this.state.read(), InfiniteQueryState::Refetching { .. });
                        if showing_spinner {
                            this.set_state(InfiniteQueryState::Success { data });
                        }
                    }
                } else if this.options.base.keep_previous_data && visible.is_some() {
                    if let Some(data) = visible {
                        this.set_state(InfiniteQueryState::Success { data });
                    }
                    if let Some(callback) = &this.options.base.on_error {
                        callback(&error);
                    }
                } else {
                    if this.options.base.cache_errors {
                        this.cache.set_error(
                            &this.key,
                            error.clone(),
                            this.options.base.entry_options(),
                        );
                    }
                    this.set_state(InfiniteQueryState::Error(error.clone()));
                    if let Some(callback) = &this.options.base.on_error {
                        callback(&error);
                    }
                }
            }
        }

        this.is_fetching.store(false, Ordering::SeqCst);
    }

    fn dispose(this: &Arc<Self>) {
        if this.is_disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(key = %this.key, "disposing infinite query engine");
        let mut tasks = this.tasks.lock();
        if let Some(interval) = tasks.interval.take() {
            interval.abort();
        }
        tasks.subscriptions.clear();
        drop(tasks);
        this.state_listeners.clear();
    }
}

impl<T, P> Drop for InfiniteEngineInner<T, P> {
    fn drop(&mut self) {
        if let Some(interval) = self.tasks.lock().interval.take() {
            interval.abort();
        }
    }
}
