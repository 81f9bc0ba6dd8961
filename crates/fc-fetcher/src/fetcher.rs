//! The fetcher: request orchestration over one shared store.
//!
//! Every endpoint moves through a small state machine:
//!
//! ```text
//!            register_interest /            debounce timer
//!            schedule_fetch                 fires
//!   idle ──────────────────────► waiting ──────────────► pending ──► idle
//!                                   ▲                       │
//!                                   │   {loading:true}      │ {loading:false, error?}
//!                                   │   to observers        ▼ to observers
//!                                   └── re-requests are ──  exactly once per cycle
//!                                       absorbed
//! ```
//!
//! All interest registered within one debounce window is batched into one
//! flush. At flush time each waiting endpoint is offered to the request
//! merger; claimed endpoints are fetched as merged groups, the rest
//! individually. An endpoint already pending is never re-fetched until
//! its in-flight call resolves, no matter how often it is re-requested.

use std::sync::{Arc, Weak};
use std::time::Duration;

use fc_core::{FetchError, FetcherConfig, PathParams, PathPattern, QueryParams};
use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::dispatch::{Dispatcher, HandlerError, RefreshReason};
use crate::merge::{MergeGroup, RequestMerger};
use crate::observers::{FetchObservers, FetchUpdate, ObserverId};
use crate::poll::PollTracker;
use crate::transport::Transport;

/// Per-endpoint bookkeeping shared by all fetcher handles.
struct FetchState {
    /// Endpoints requested this tick, not yet dispatched.
    waiting: FxHashSet<String>,

    /// Endpoints with a network call in flight.
    pending: FxHashSet<String>,

    /// Observer records, created lazily and kept for the session.
    observers: FxHashMap<String, Arc<FetchObservers>>,

    /// Poll trackers for endpoints with at least one poll subscriber.
    polls: FxHashMap<String, PollTracker>,

    /// Bumped on every schedule; only the newest flush timer fires.
    flush_generation: u64,
}

struct Inner<S> {
    config: FetcherConfig,
    dispatcher: Dispatcher<S>,
    store: Arc<Mutex<S>>,
    merger: Mutex<RequestMerger>,
    state: Mutex<FetchState>,
}

/// Orchestrates fetches for one console session.
///
/// Cheap to clone; all clones share the same bookkeeping, route table,
/// and store. Handlers and merge rules are usually registered once at
/// startup, interest comes and goes with the UI.
///
/// # Examples
///
/// ```no_run
/// use fc_core::FetcherConfig;
/// use fc_fetcher::{Fetcher, StaticTransport};
///
/// #[derive(Default)]
/// struct Store {
///     mesh_names: Vec<String>,
/// }
///
/// # async fn example() {
/// let fetcher = Fetcher::new(
///     FetcherConfig::default(),
///     StaticTransport::shared(),
///     Store::default(),
///     |_reason| { /* surface a refresh banner */ },
/// );
///
/// fetcher.register_handler("/ac/mesh", false, |store: &mut Store, body, _, _| {
///     store.mesh_names = serde_json::from_value(body.clone())?;
///     Ok(())
/// });
///
/// let id = fetcher.register_interest("/ac/mesh", None, |update| {
///     if !update.loading {
///         // render
///     }
/// });
/// let outcome = fetcher.fetch_now("/ac/mesh").await;
/// assert!(outcome.is_none());
/// fetcher.unregister_interest("/ac/mesh", id, None);
/// # }
/// ```
pub struct Fetcher<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Fetcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + 'static> Fetcher<S> {
    /// Creates a fetcher over a transport, a store, and a refresh signal.
    ///
    /// The store is owned by the fetcher from here on; handlers receive
    /// exclusive access to it per invocation, readers go through
    /// [`with_store`](Self::with_store).
    pub fn new(
        config: FetcherConfig,
        transport: Arc<dyn Transport>,
        store: S,
        refresh: impl Fn(&RefreshReason) + Send + Sync + 'static,
    ) -> Self {
        let store = Arc::new(Mutex::new(store));
        let dispatcher = Dispatcher::new(
            transport,
            Arc::clone(&store),
            Arc::new(refresh),
            config.client_version.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                store,
                merger: Mutex::new(RequestMerger::new()),
                state: Mutex::new(FetchState {
                    waiting: FxHashSet::default(),
                    pending: FxHashSet::default(),
                    observers: FxHashMap::default(),
                    polls: FxHashMap::default(),
                    flush_generation: 0,
                }),
            }),
        }
    }

    /// The configuration this fetcher runs with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FetcherConfig {
        &self.inner.config
    }

    /// Runs a closure over the shared store.
    ///
    /// Readers must come through here so they observe each handler's
    /// mutations atomically.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let store = self.inner.store.lock();
        f(&store)
    }

    /// Registers a response handler for an endpoint pattern.
    ///
    /// Appends to the dispatch priority list: for any pathname the first
    /// registered matching pattern wins. With `accepts_http_errors` set,
    /// the handler also receives 4xx/5xx bodies; without it, HTTP errors
    /// are turned into [`FetchError`]s before the handler is consulted.
    pub fn register_handler(
        &self,
        pattern: &str,
        accepts_http_errors: bool,
        handler: impl Fn(&mut S, &Value, &PathParams, &QueryParams) -> Result<(), HandlerError>
        + Send
        + Sync
        + 'static,
    ) {
        self.inner
            .dispatcher
            .push_route(PathPattern::parse(pattern), accepts_http_errors, handler);
    }

    /// Registers a merge rule collapsing same-shaped requests.
    ///
    /// Rules form their own priority list, checked at flush time. See
    /// [`RequestMerger`](crate::RequestMerger) for bucketing semantics.
    pub fn register_merge_rule(
        &self,
        pattern: &str,
        merge: impl Fn(&[PathParams], &QueryParams) -> Vec<String> + Send + Sync + 'static,
    ) {
        self.inner
            .merger
            .lock()
            .register_rule(PathPattern::parse(pattern), merge);
    }

    /// Declares interest in an endpoint.
    ///
    /// Lazily creates the endpoint's observer record, registers the
    /// callback, applies poll bookkeeping when an interval is given, and
    /// schedules a fetch on the current tick. Returns the token needed to
    /// unregister.
    pub fn register_interest(
        &self,
        endpoint: &str,
        poll_interval: Option<Duration>,
        callback: impl Fn(&FetchUpdate) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = {
            let mut state = self.inner.state.lock();
            let observers = state
                .observers
                .entry(endpoint.to_owned())
                .or_insert_with(|| Arc::new(FetchObservers::new()));
            let id = observers.add_observer(callback);

            if let Some(interval) = poll_interval {
                let tracker = state.polls.entry(endpoint.to_owned()).or_insert_with(|| {
                    Self::new_poll_tracker(&self.inner, endpoint)
                });
                tracker.add_interval(interval);
            }
            id
        };

        self.schedule_fetch(endpoint);
        id
    }

    /// Withdraws a previously declared interest.
    ///
    /// `poll_interval` must match the value passed at registration so the
    /// poll multiset stays balanced. The observer record itself is kept:
    /// records live for the session.
    pub fn unregister_interest(
        &self,
        endpoint: &str,
        id: ObserverId,
        poll_interval: Option<Duration>,
    ) {
        let mut state = self.inner.state.lock();
        if let Some(observers) = state.observers.get(endpoint) {
            observers.remove_observer(id);
        }

        if let Some(interval) = poll_interval {
            match state.polls.get_mut(endpoint) {
                Some(tracker) => {
                    if tracker.remove_interval(interval) == 0 {
                        state.polls.remove(endpoint);
                    }
                }
                None => {
                    tracing::error!(
                        endpoint,
                        "Unregistering a poll interval for an endpoint without a poll tracker"
                    );
                }
            }
        }
    }

    /// Schedules a fetch for the endpoint on the current tick.
    ///
    /// No-op while a call for the endpoint is already in flight. All
    /// endpoints scheduled before the debounce timer fires are flushed
    /// together.
    pub fn schedule_fetch(&self, endpoint: &str) {
        Inner::schedule(&self.inner, endpoint);
    }

    /// Fetches the endpoint immediately, bypassing the debounce window.
    ///
    /// Resolves with the outcome of the next completed fetch for the
    /// endpoint: if a call is already in flight this attaches to it
    /// instead of issuing a second one. Calling without any registered
    /// interest is a caller bug — logged, resolves immediately with `None`
    /// and no fetch.
    pub async fn fetch_now(&self, endpoint: &str) -> Option<FetchError> {
        let (waiter, fire) = {
            let mut state = self.inner.state.lock();
            let Some(observers) = state.observers.get(endpoint).map(Arc::clone) else {
                tracing::error!(
                    endpoint,
                    "fetch_now called without registered interest; resolving without a fetch"
                );
                return None;
            };
            let waiter = observers.wait_next_fetch();
            if state.pending.contains(endpoint) {
                (waiter, None)
            } else {
                state.waiting.remove(endpoint);
                state.pending.insert(endpoint.to_owned());
                (waiter, Some(observers))
            }
        };

        if let Some(observers) = fire {
            observers.notify_result(&FetchUpdate::started());
            let error = self.inner.dispatcher.dispatch(endpoint).await;
            self.inner.complete(endpoint, error);
        }
        waiter.wait().await
    }

    /// Builds the poll tracker for an endpoint.
    ///
    /// The tick hook holds a weak handle so an abandoned fetcher is not
    /// kept alive by its own poll timers.
    fn new_poll_tracker(inner: &Arc<Inner<S>>, endpoint: &str) -> PollTracker {
        let weak: Weak<Inner<S>> = Arc::downgrade(inner);
        let endpoint = endpoint.to_owned();
        PollTracker::new(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                Inner::schedule(&inner, &endpoint);
            }
        }))
    }
}

impl<S: Send + 'static> Inner<S> {
    /// Adds the endpoint to the waiting set and re-arms the flush timer.
    fn schedule(inner: &Arc<Self>, endpoint: &str) {
        let generation = {
            let mut state = inner.state.lock();
            if state.pending.contains(endpoint) {
                return;
            }
            state.waiting.insert(endpoint.to_owned());
            state.flush_generation += 1;
            state.flush_generation
        };

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let debounce = inner.config.debounce();
            if debounce.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(debounce).await;
            }
            Self::flush(&inner, generation).await;
        });
    }

    /// Moves every waiting endpoint to pending and dispatches the batch.
    ///
    /// Stale timers (superseded by a later schedule) do nothing: each
    /// schedule call re-arms the single logical debounce timer.
    async fn flush(inner: &Arc<Self>, generation: u64) {
        let batch: Vec<(String, Option<Arc<FetchObservers>>)> = {
            let mut state = inner.state.lock();
            if state.flush_generation != generation {
                return;
            }
            let waiting = std::mem::take(&mut state.waiting);
            let mut batch = Vec::with_capacity(waiting.len());
            for endpoint in waiting {
                state.pending.insert(endpoint.clone());
                let observers = state.observers.get(&endpoint).cloned();
                batch.push((endpoint, observers));
            }
            batch
        };

        if batch.is_empty() {
            return;
        }
        tracing::debug!(endpoints = batch.len(), "Flushing fetch batch");

        for (_, observers) in &batch {
            if let Some(observers) = observers {
                observers.notify_result(&FetchUpdate::started());
            }
        }

        let (individual, groups) = {
            let mut merger = inner.merger.lock();
            let mut individual = Vec::new();
            for (endpoint, _) in &batch {
                if !merger.try_match(endpoint) {
                    individual.push(endpoint.clone());
                }
            }
            let mut groups = Vec::new();
            merger.flush_and_clear(|group| groups.push(group));
            (individual, groups)
        };

        for endpoint in individual {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                let error = inner.dispatcher.dispatch(&endpoint).await;
                inner.complete(&endpoint, error);
            });
        }

        for group in groups {
            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                Self::dispatch_group(&inner, group).await;
            });
        }
    }

    /// Fetches a merge group and broadcasts the shared outcome.
    ///
    /// All real endpoints fetch concurrently. More than one failure
    /// collapses into the merged-errors sentinel; every original endpoint
    /// of the group receives the same outcome.
    async fn dispatch_group(inner: &Arc<Self>, group: MergeGroup) {
        let results = join_all(
            group
                .targets
                .iter()
                .map(|target| inner.dispatcher.dispatch(target)),
        )
        .await;

        let errors: Vec<FetchError> = results.into_iter().flatten().collect();
        let outcome = if errors.is_empty() {
            None
        } else {
            Some(FetchError::merged(errors))
        };

        for source in &group.sources {
            inner.complete(source, outcome.clone());
        }
    }

    /// Marks an endpoint idle and broadcasts the completed transition.
    fn complete(&self, endpoint: &str, error: Option<FetchError>) {
        let observers = {
            let mut state = self.state.lock();
            state.pending.remove(endpoint);
            state.observers.get(endpoint).cloned()
        };
        if let Some(observers) = observers {
            observers.notify_result(&FetchUpdate::completed(error));
        }
    }
}

impl<S> std::fmt::Debug for Fetcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Fetcher")
            .field("waiting", &state.waiting.len())
            .field("pending", &state.pending.len())
            .field("observers", &state.observers.len())
            .field("polls", &state.polls.len())
            .finish_non_exhaustive()
    }
}
