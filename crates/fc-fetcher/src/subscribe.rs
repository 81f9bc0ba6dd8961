//! Subscription handles for UI consumers.
//!
//! Components do not talk to the orchestrator directly; they hold a
//! [`Subscription`] per endpoint (or a [`SubscriptionSet`] over several)
//! and read a uniform [`FetchStatus`] from it. Registration happens on
//! construction, unregistration on drop, so interest tracking follows
//! ordinary ownership.

use std::sync::Arc;
use std::time::Duration;

use fc_core::FetchError;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::fetcher::Fetcher;
use crate::observers::{FetchUpdate, ObserverId};

/// Options accepted when declaring interest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Re-fetch the endpoint at this cadence while subscribed.
    ///
    /// The fetcher honors the minimum across all subscribers of the same
    /// endpoint.
    pub poll_interval: Option<Duration>,

    /// The subscription's inputs are not valid yet (e.g. an id still
    /// being typed). No interest is registered and the status stays
    /// `{loading: false, error: None}` regardless of any stale state.
    pub is_invalid: bool,
}

/// The uniform state shape subscribers consume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStatus {
    /// `true` while any covered endpoint is loading.
    pub loading: bool,

    /// The governing error, if any.
    pub error: Option<FetchError>,
}

impl FetchStatus {
    /// Merges several already-obtained statuses into one.
    ///
    /// Loading is an OR; the first non-`None` error in iteration order
    /// wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use fc_core::FetchError;
    /// use fc_fetcher::FetchStatus;
    ///
    /// let idle = FetchStatus::default();
    /// let failed = FetchStatus {
    ///     loading: false,
    ///     error: Some(FetchError::new(500, "boom")),
    /// };
    /// let busy = FetchStatus {
    ///     loading: true,
    ///     error: None,
    /// };
    ///
    /// let combined = FetchStatus::combine([&idle, &failed, &busy]);
    /// assert!(combined.loading);
    /// assert_eq!(combined.error.map(|e| e.status), Some(500));
    /// ```
    #[must_use]
    pub fn combine<'a>(statuses: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut combined = Self::default();
        for status in statuses {
            combined.loading = combined.loading || status.loading;
            if combined.error.is_none() {
                combined.error = status.error.clone();
            }
        }
        combined
    }
}

/// Interest in a single endpoint, released on drop.
pub struct Subscription<S: Send + 'static> {
    fetcher: Fetcher<S>,
    endpoint: String,
    poll_interval: Option<Duration>,

    /// `None` for invalid subscriptions, which register nothing.
    registration: Option<ObserverId>,

    status_rx: watch::Receiver<FetchStatus>,
}

impl<S: Send + 'static> Fetcher<S> {
    /// Subscribes to one endpoint.
    ///
    /// Registers interest (unless `options.is_invalid`), applies the poll
    /// interval, and schedules a fetch on the current tick.
    #[must_use]
    pub fn subscribe(&self, endpoint: &str, options: SubscribeOptions) -> Subscription<S> {
        let (tx, status_rx) = watch::channel(FetchStatus::default());

        let registration = if options.is_invalid {
            None
        } else {
            Some(
                self.register_interest(endpoint, options.poll_interval, move |update| {
                    let _ = tx.send(FetchStatus {
                        loading: update.loading,
                        error: update.error.clone(),
                    });
                }),
            )
        };

        Subscription {
            fetcher: self.clone(),
            endpoint: endpoint.to_owned(),
            poll_interval: options.poll_interval,
            registration,
            status_rx,
        }
    }

    /// Subscribes to several endpoints with one aggregate status.
    ///
    /// Aggregate loading is `true` while any endpoint is loading. The
    /// chronologically first error wins and stays sticky until a later
    /// successful fetch of that same endpoint.
    #[must_use]
    pub fn subscribe_all(&self, endpoints: &[&str], options: SubscribeOptions) -> SubscriptionSet<S> {
        let (tx, status_rx) = watch::channel(FetchStatus::default());
        let tx = Arc::new(tx);
        let state = Arc::new(Mutex::new(AggregateState {
            slots: vec![MemberSlot::default(); endpoints.len()],
            first_error_member: None,
        }));

        let mut registrations = Vec::new();
        if !options.is_invalid {
            for (index, endpoint) in endpoints.iter().enumerate() {
                let state = Arc::clone(&state);
                let tx = Arc::clone(&tx);
                registrations.push(self.register_interest(
                    endpoint,
                    options.poll_interval,
                    move |update| {
                        let combined = {
                            let mut aggregate = state.lock();
                            aggregate.apply(index, update);
                            aggregate.combined()
                        };
                        let _ = tx.send(combined);
                    },
                ));
            }
        }

        SubscriptionSet {
            fetcher: self.clone(),
            endpoints: endpoints.iter().map(|&e| e.to_owned()).collect(),
            poll_interval: options.poll_interval,
            registrations,
            status_rx,
        }
    }
}

impl<S: Send + 'static> Subscription<S> {
    /// The endpoint this subscription covers.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `false` for subscriptions created with `is_invalid`.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registration.is_some()
    }

    /// The current fetch status.
    #[must_use]
    pub fn status(&self) -> FetchStatus {
        self.status_rx.borrow().clone()
    }

    /// Waits for the next status change.
    ///
    /// Returns `false` once no further changes can arrive.
    pub async fn changed(&mut self) -> bool {
        self.status_rx.changed().await.is_ok()
    }

    /// Forces a fetch outside the debounce window.
    ///
    /// A no-op resolving with `None` for invalid subscriptions.
    pub async fn fetch_now(&self) -> Option<FetchError> {
        if self.registration.is_none() {
            return None;
        }
        self.fetcher.fetch_now(&self.endpoint).await
    }
}

impl<S: Send + 'static> Drop for Subscription<S> {
    fn drop(&mut self) {
        if let Some(id) = self.registration.take() {
            self.fetcher
                .unregister_interest(&self.endpoint, id, self.poll_interval);
        }
    }
}

impl<S: Send + 'static> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("endpoint", &self.endpoint)
            .field("active", &self.registration.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
struct MemberSlot {
    loading: bool,
    error: Option<FetchError>,
}

#[derive(Debug)]
struct AggregateState {
    slots: Vec<MemberSlot>,
    first_error_member: Option<usize>,
}

impl AggregateState {
    fn apply(&mut self, index: usize, update: &FetchUpdate) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        slot.loading = update.loading;
        if update.loading {
            // An in-flight reload does not clear the member's last error.
            return;
        }

        match &update.error {
            Some(error) => {
                slot.error = Some(error.clone());
                if self.first_error_member.is_none() {
                    self.first_error_member = Some(index);
                }
            }
            None => {
                slot.error = None;
                if self.first_error_member == Some(index) {
                    self.first_error_member =
                        self.slots.iter().position(|slot| slot.error.is_some());
                }
            }
        }
    }

    fn combined(&self) -> FetchStatus {
        FetchStatus {
            loading: self.slots.iter().any(|slot| slot.loading),
            error: self
                .first_error_member
                .and_then(|index| self.slots.get(index))
                .and_then(|slot| slot.error.clone()),
        }
    }
}

/// Interest in several endpoints with one aggregate status.
///
/// Also serves as the status combinator: [`status`](Self::status) merges
/// member states and [`fetch_now`](Self::fetch_now) fans out to every
/// member.
pub struct SubscriptionSet<S: Send + 'static> {
    fetcher: Fetcher<S>,
    endpoints: Vec<String>,
    poll_interval: Option<Duration>,
    registrations: Vec<ObserverId>,
    status_rx: watch::Receiver<FetchStatus>,
}

impl<S: Send + 'static> SubscriptionSet<S> {
    /// The endpoints this set covers, in registration order.
    #[inline]
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Number of covered endpoints.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// `true` when the set covers no endpoints.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The current aggregate status.
    #[must_use]
    pub fn status(&self) -> FetchStatus {
        self.status_rx.borrow().clone()
    }

    /// Waits for the next aggregate status change.
    ///
    /// Returns `false` once no further changes can arrive.
    pub async fn changed(&mut self) -> bool {
        self.status_rx.changed().await.is_ok()
    }

    /// Forces a fetch of every member, outside the debounce window.
    ///
    /// Resolves once all members complete, with the first failure (in
    /// member order), if any. A no-op for invalid sets.
    pub async fn fetch_now(&self) -> Option<FetchError> {
        if self.registrations.is_empty() {
            return None;
        }
        let outcomes = join_all(
            self.endpoints
                .iter()
                .map(|endpoint| self.fetcher.fetch_now(endpoint)),
        )
        .await;
        outcomes.into_iter().flatten().next()
    }
}

impl<S: Send + 'static> Drop for SubscriptionSet<S> {
    fn drop(&mut self) {
        for (endpoint, id) in self.endpoints.iter().zip(self.registrations.drain(..)) {
            self.fetcher
                .unregister_interest(endpoint, id, self.poll_interval);
        }
    }
}

impl<S: Send + 'static> std::fmt::Debug for SubscriptionSet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("endpoints", &self.endpoints)
            .field("active", &!self.registrations.is_empty())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RefreshReason;
    use crate::transport::{StaticTransport, Transport};
    use fc_core::FetcherConfig;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct CountStore {
        payloads: usize,
    }

    fn fetcher_with(transport: &Arc<StaticTransport>) -> Fetcher<CountStore> {
        let fetcher = Fetcher::new(
            FetcherConfig::default(),
            Arc::clone(transport) as Arc<dyn Transport>,
            CountStore::default(),
            |_: &RefreshReason| {},
        );
        fetcher.register_handler("/ac/*", false, |store: &mut CountStore, _, _, _| {
            store.payloads += 1;
            Ok(())
        });
        fetcher
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_reports_completed_status() {
        let transport = StaticTransport::shared();
        transport.script_json("/ac/mesh", 200, &json!([]));
        let fetcher = fetcher_with(&transport);

        let subscription = fetcher.subscribe("/ac/mesh", SubscribeOptions::default());
        let outcome = subscription.fetch_now().await;

        assert_eq!(outcome, None);
        let status = subscription.status();
        assert!(!status.loading);
        assert_eq!(status.error, None);
        assert!(subscription.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_subscription_registers_nothing() {
        let transport = StaticTransport::shared();
        let fetcher = fetcher_with(&transport);

        let subscription = fetcher.subscribe(
            "/ac/mesh",
            SubscribeOptions {
                is_invalid: true,
                ..SubscribeOptions::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(transport.requests().is_empty());
        assert!(!subscription.is_active());
        assert_eq!(subscription.status(), FetchStatus::default());
        assert_eq!(subscription.fetch_now().await, None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_poll_interval() {
        let transport = StaticTransport::shared();
        transport.script_json("/ac/mesh", 200, &json!([]));
        let fetcher = fetcher_with(&transport);

        let subscription = fetcher.subscribe(
            "/ac/mesh",
            SubscribeOptions {
                poll_interval: Some(Duration::from_millis(10_000)),
                ..SubscribeOptions::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let while_subscribed = transport.request_count("/ac/mesh");
        assert_eq!(while_subscribed, 2);

        drop(subscription);
        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert_eq!(transport.request_count("/ac/mesh"), while_subscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_aggregates_loading_and_error() {
        let transport = StaticTransport::shared();
        transport.script_json("/ac/mesh", 200, &json!([]));
        transport.script_json("/ac/partner", 500, &json!({"detail": "down"}));
        let fetcher = fetcher_with(&transport);

        let set = fetcher.subscribe_all(&["/ac/mesh", "/ac/partner"], SubscribeOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = set.status();
        assert!(!status.loading);
        assert_eq!(status.error.as_ref().map(|e| e.status), Some(500));
        assert_eq!(set.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_error_clears_after_member_succeeds() {
        let transport = StaticTransport::shared();
        transport.script_json("/ac/mesh", 200, &json!([]));
        transport.script_json("/ac/partner", 500, &json!({"detail": "down"}));
        transport.script_json("/ac/partner", 200, &json!([]));
        let fetcher = fetcher_with(&transport);

        let set = fetcher.subscribe_all(&["/ac/mesh", "/ac/partner"], SubscribeOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(set.status().error.is_some());

        // The failed member recovers on the next fetch.
        fetcher.fetch_now("/ac/partner").await;
        assert_eq!(set.status().error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_error_is_sticky_while_member_reloads() {
        let transport = StaticTransport::shared();
        transport.script_json("/ac/partner", 500, &json!({"detail": "down"}));
        let fetcher = fetcher_with(&transport);

        let set = fetcher.subscribe_all(&["/ac/partner"], SubscribeOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(set.status().error.is_some());

        // Re-fetch of the same failing endpoint: the error stays visible
        // both during the reload and after it fails again.
        let during = set.status();
        assert!(during.error.is_some());
        fetcher.fetch_now("/ac/partner").await;
        assert!(set.status().error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_fetch_now_fans_out() {
        let transport = StaticTransport::shared();
        transport.script_json("/ac/mesh", 200, &json!([]));
        transport.script_json("/ac/partner", 200, &json!([]));
        let fetcher = fetcher_with(&transport);

        let set = fetcher.subscribe_all(&["/ac/mesh", "/ac/partner"], SubscribeOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        let before_mesh = transport.request_count("/ac/mesh");
        let before_partner = transport.request_count("/ac/partner");

        let outcome = set.fetch_now().await;
        assert_eq!(outcome, None);
        assert_eq!(transport.request_count("/ac/mesh"), before_mesh + 1);
        assert_eq!(transport.request_count("/ac/partner"), before_partner + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_set_is_inert() {
        let transport = StaticTransport::shared();
        let fetcher = fetcher_with(&transport);

        let set = fetcher.subscribe_all(
            &["/ac/mesh", "/ac/partner"],
            SubscribeOptions {
                is_invalid: true,
                ..SubscribeOptions::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(transport.requests().is_empty());
        assert_eq!(set.status(), FetchStatus::default());
        assert_eq!(set.fetch_now().await, None);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_combine_or_loading_first_error() {
        let failed = FetchStatus {
            loading: false,
            error: Some(FetchError::new(404, "missing")),
        };
        let also_failed = FetchStatus {
            loading: false,
            error: Some(FetchError::new(500, "later")),
        };
        let busy = FetchStatus {
            loading: true,
            error: None,
        };

        let combined = FetchStatus::combine([&busy, &failed, &also_failed]);
        assert!(combined.loading);
        assert_eq!(combined.error.map(|e| e.status), Some(404));

        let empty = FetchStatus::combine([]);
        assert_eq!(empty, FetchStatus::default());
    }
}
