//! Per-endpoint fetch observers.
//!
//! Every endpoint with registered interest owns one [`FetchObservers`]
//! record: a list of state-change callbacks plus a broadcast point for
//! "a fetch just completed". Records are created lazily on first interest
//! and never destroyed — the surrounding application is a single session,
//! so the bookkeeping lives as long as the process.

use std::sync::Arc;

use fc_core::FetchError;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::oneshot;

/// A fetch state transition delivered to observers.
///
/// `loading: true` marks the start of a fetch cycle; `loading: false`
/// marks its completion, with `error` carrying the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchUpdate {
    /// `true` while a network call for the endpoint is in flight.
    pub loading: bool,

    /// The failure of the completed fetch, if any.
    pub error: Option<FetchError>,
}

impl FetchUpdate {
    /// The "fetch started" transition.
    #[inline]
    #[must_use]
    pub const fn started() -> Self {
        Self {
            loading: true,
            error: None,
        }
    }

    /// The "fetch completed" transition with an optional failure.
    #[inline]
    #[must_use]
    pub const fn completed(error: Option<FetchError>) -> Self {
        Self {
            loading: false,
            error,
        }
    }
}

/// Callback signature for fetch state observers.
pub type ObserverFn = dyn Fn(&FetchUpdate) + Send + Sync;

/// Token identifying one registered observer.
///
/// Closures have no identity in Rust, so removal works through the token
/// handed out at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A one-shot handle resolving on the next completed fetch.
///
/// Created by [`FetchObservers::wait_next_fetch`]. Resolves with the
/// completed fetch's outcome; resolves with `None` if the record is
/// dropped before another fetch completes.
#[derive(Debug)]
pub struct NextFetch(oneshot::Receiver<Option<FetchError>>);

impl NextFetch {
    /// Waits for the next completed fetch.
    pub async fn wait(self) -> Option<FetchError> {
        self.0.await.ok().flatten()
    }
}

/// Most endpoints have one or two observers; keep them inline.
#[derive(Default)]
struct ObserverList {
    next_id: u64,
    observers: SmallVec<[(ObserverId, Arc<ObserverFn>); 2]>,
    waiters: SmallVec<[oneshot::Sender<Option<FetchError>>; 2]>,
}

/// The observer record for one endpoint.
///
/// Callbacks are invoked synchronously, in registration order. Completion
/// (`loading: false`) additionally resolves every pending
/// [`wait_next_fetch`](Self::wait_next_fetch) handle exactly once.
///
/// # Examples
///
/// ```
/// use fc_fetcher::{FetchObservers, FetchUpdate};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let observers = FetchObservers::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// let id = observers.add_observer(move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// observers.notify_result(&FetchUpdate::started());
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
///
/// observers.remove_observer(id);
/// observers.notify_result(&FetchUpdate::completed(None));
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct FetchObservers {
    inner: Mutex<ObserverList>,
}

impl FetchObservers {
    /// Creates an empty observer record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback, returning its removal token.
    pub fn add_observer(&self, callback: impl Fn(&FetchUpdate) + Send + Sync + 'static) -> ObserverId {
        let mut inner = self.inner.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.observers.push((id, Arc::new(callback)));
        id
    }

    /// Removes a previously registered callback.
    ///
    /// Removing an unknown token is a silent no-op.
    pub fn remove_observer(&self, id: ObserverId) {
        self.inner.lock().observers.retain(|(other, _)| *other != id);
    }

    /// Number of currently registered callbacks.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Delivers a state transition to every registered callback.
    ///
    /// Callbacks run synchronously in registration order, outside the
    /// record's internal lock so they may re-register or unregister freely.
    /// A non-loading update also resolves all pending completion waiters.
    pub fn notify_result(&self, update: &FetchUpdate) {
        let (callbacks, waiters) = {
            let mut inner = self.inner.lock();
            let callbacks: Vec<Arc<ObserverFn>> =
                inner.observers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            let waiters = if update.loading {
                SmallVec::new()
            } else {
                std::mem::take(&mut inner.waiters)
            };
            (callbacks, waiters)
        };

        for callback in callbacks {
            callback(update);
        }
        for waiter in waiters {
            // A dropped receiver just means the caller stopped waiting.
            let _ = waiter.send(update.error.clone());
        }
    }

    /// Returns a handle resolving on the *next* completed fetch.
    ///
    /// The handle never resolves retroactively for a fetch that completed
    /// before this call.
    #[must_use]
    pub fn wait_next_fetch(&self) -> NextFetch {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().waiters.push(tx);
        NextFetch(rx)
    }
}

impl std::fmt::Debug for FetchObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchObservers")
            .field("observer_count", &self.observer_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_observer(observers: &FetchObservers) -> (ObserverId, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = observers.add_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (id, count)
    }

    #[test]
    fn test_observers_notified_in_registration_order() {
        let observers = FetchObservers::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            observers.add_observer(move |_| order.lock().push(label));
        }

        observers.notify_result(&FetchUpdate::started());
        assert_eq!(*order.lock(), ["first", "second", "third"]);
    }

    #[test]
    fn test_remove_observer_stops_notifications() {
        let observers = FetchObservers::new();
        let (id, count) = counting_observer(&observers);

        observers.notify_result(&FetchUpdate::started());
        observers.remove_observer(id);
        observers.notify_result(&FetchUpdate::completed(None));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(observers.observer_count(), 0);
    }

    #[test]
    fn test_remove_unknown_observer_is_noop() {
        let observers = FetchObservers::new();
        let (id, _) = counting_observer(&observers);
        observers.remove_observer(id);
        // Second removal of the same token must not disturb anything.
        observers.remove_observer(id);
        assert_eq!(observers.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_next_fetch_resolves_on_completion() {
        let observers = FetchObservers::new();
        let waiter = observers.wait_next_fetch();

        observers.notify_result(&FetchUpdate::completed(Some(FetchError::new(500, "boom"))));

        let outcome = waiter.wait().await;
        assert_eq!(outcome, Some(FetchError::new(500, "boom")));
    }

    #[tokio::test]
    async fn test_wait_next_fetch_ignores_loading_updates() {
        let observers = FetchObservers::new();
        let waiter = observers.wait_next_fetch();

        observers.notify_result(&FetchUpdate::started());
        observers.notify_result(&FetchUpdate::completed(None));

        assert_eq!(waiter.wait().await, None);
    }

    #[tokio::test]
    async fn test_wait_next_fetch_is_not_retroactive() {
        let observers = FetchObservers::new();
        observers.notify_result(&FetchUpdate::completed(Some(FetchError::new(500, "old"))));

        let waiter = observers.wait_next_fetch();
        observers.notify_result(&FetchUpdate::completed(None));

        // The waiter sees the fetch after its registration, not the old one.
        assert_eq!(waiter.wait().await, None);
    }

    #[tokio::test]
    async fn test_waiters_resolve_exactly_once() {
        let observers = FetchObservers::new();
        let first = observers.wait_next_fetch();

        observers.notify_result(&FetchUpdate::completed(Some(FetchError::new(500, "first"))));
        observers.notify_result(&FetchUpdate::completed(Some(FetchError::new(502, "second"))));

        // The waiter resolved with the first completion; the second one had
        // no pending waiters left.
        assert_eq!(first.wait().await, Some(FetchError::new(500, "first")));
    }

    #[test]
    fn test_callbacks_may_reenter_the_record() {
        let observers = Arc::new(FetchObservers::new());
        let reentrant = Arc::clone(&observers);
        let added = Arc::new(AtomicUsize::new(0));
        let added_inner = Arc::clone(&added);

        observers.add_observer(move |_| {
            // Registering from inside a notification must not deadlock.
            let counter = Arc::clone(&added_inner);
            reentrant.add_observer(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        observers.notify_result(&FetchUpdate::started());
        assert_eq!(observers.observer_count(), 2);
    }
}
