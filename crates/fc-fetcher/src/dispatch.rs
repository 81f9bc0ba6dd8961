//! Response dispatch: one GET, one handler, one outcome.
//!
//! The dispatcher owns the priority-ordered route table. For every
//! response — success and failure alike — it checks the server build
//! version, recognizes session expiry, finds the first route whose
//! pattern matches the endpoint's pathname, and runs that route's handler
//! against the shared store. The outcome is always `Option<FetchError>`:
//! dispatching never panics and never returns a bare `Err`.
//!
//! Handlers are the only code allowed to mutate the store, and each
//! handler invocation runs under the store mutex, so every mutation made
//! by one handler call is observed atomically by readers.

use std::sync::Arc;

use fc_core::{FetchError, ParsedEndpoint, PathParams, PathPattern, QueryParams};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;

use crate::transport::Transport;

/// Why the application should invite the user to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshReason {
    /// The server reports a build version different from this client's.
    VersionMismatch {
        /// The version the server reported.
        server_version: String,
    },

    /// The server rejected the session (HTTP 401 with a login envelope).
    LoginRequired {
        /// Reason code embedded in the login envelope.
        code: u32,
    },
}

/// Callback receiving refresh invitations.
///
/// Lives outside the fetch layer: typically it surfaces a "please reload"
/// banner. Invoked at most once per distinct detected server version, and
/// once per rejected session response.
pub type RefreshSignal = Arc<dyn Fn(&RefreshReason) + Send + Sync>;

/// A failure reported by a response handler.
///
/// The tagged replacement for loosely-typed handler returns: either a
/// payload shape mismatch naming the offending field path, or a plain
/// message used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The payload did not match the expected shape.
    #[error("response validation failed at `{path}`: expected {expected}")]
    Invalid {
        /// Path of the offending field (e.g. `entries[1].userId`).
        path: String,
        /// What the handler expected to find there.
        expected: String,
    },

    /// A free-form failure message, used verbatim.
    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    /// Creates a validation failure naming the offending field path.
    #[inline]
    pub fn invalid(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            expected: expected.into(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Message(err.to_string())
    }
}

/// A response handler: validates the decoded payload and applies the
/// corresponding mutation to the shared store.
pub type Handler<S> =
    Arc<dyn Fn(&mut S, &Value, &PathParams, &QueryParams) -> Result<(), HandlerError> + Send + Sync>;

struct Route<S> {
    pattern: PathPattern,
    handler: Handler<S>,
    accepts_http_errors: bool,
}

impl<S> Clone for Route<S> {
    fn clone(&self) -> Self {
        Self {
            pattern: self.pattern.clone(),
            handler: Arc::clone(&self.handler),
            accepts_http_errors: self.accepts_http_errors,
        }
    }
}

/// The 401 body shape marking a rejected session.
#[derive(Debug, Deserialize)]
struct LoginRequiredEnvelope {
    error: String,
    code: u32,
}

/// Issues requests and routes responses to registered handlers.
pub struct Dispatcher<S> {
    routes: RwLock<Vec<Route<S>>>,
    transport: Arc<dyn Transport>,
    store: Arc<Mutex<S>>,
    refresh: RefreshSignal,
    client_version: String,

    /// Last server version the refresh signal fired for.
    signaled_version: Mutex<Option<String>>,
}

impl<S: Send + 'static> Dispatcher<S> {
    /// Creates a dispatcher with an empty route table.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<Mutex<S>>,
        refresh: RefreshSignal,
        client_version: impl Into<String>,
    ) -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
            transport,
            store,
            refresh,
            client_version: client_version.into(),
            signaled_version: Mutex::new(None),
        }
    }

    /// Appends a route to the priority list.
    ///
    /// Registration order is significant: for any pathname, the first
    /// matching pattern wins and later ones are never consulted. Routes
    /// registered without `accepts_http_errors` never see 4xx/5xx bodies.
    pub fn push_route(
        &self,
        pattern: PathPattern,
        accepts_http_errors: bool,
        handler: impl Fn(&mut S, &Value, &PathParams, &QueryParams) -> Result<(), HandlerError>
        + Send
        + Sync
        + 'static,
    ) {
        self.routes.write().push(Route {
            pattern,
            handler: Arc::new(handler),
            accepts_http_errors,
        });
    }

    /// Number of registered routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Fetches one endpoint and runs the matching handler.
    ///
    /// Performs exactly one GET. Returns `None` on success and the
    /// [`FetchError`] otherwise; never panics, never rejects.
    pub async fn dispatch(&self, endpoint: &str) -> Option<FetchError> {
        let raw = match self.transport.get(endpoint).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(endpoint, error = %err, "Transport failure");
                return Some(FetchError::transport(err.to_string()));
            }
        };

        self.check_server_version(raw.version.as_deref());

        let body: Value = if raw.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw.body).unwrap_or(Value::Null)
        };

        if raw.status == 401 {
            if let Some(code) = decode_login_envelope(&body) {
                tracing::info!(endpoint, code, "Session rejected by server");
                (self.refresh)(&RefreshReason::LoginRequired { code });
                return Some(FetchError::new(401, format!("login required (code {code})")));
            }
        }

        let parsed = ParsedEndpoint::parse(endpoint);
        let route = {
            let routes = self.routes.read();
            routes
                .iter()
                .find_map(|route| {
                    route
                        .pattern
                        .matches(parsed.pathname())
                        .map(|params| (route.clone(), params))
                })
        };

        let Some((route, params)) = route else {
            tracing::error!(
                endpoint,
                "No handler registered for endpoint; this is likely a registration bug"
            );
            return Some(FetchError::new(
                raw.status,
                format!("no handler registered for endpoint '{endpoint}'"),
            ));
        };

        if !route.accepts_http_errors && (400..=599).contains(&raw.status) {
            tracing::warn!(
                endpoint,
                status = raw.status,
                pattern = %route.pattern.pattern(),
                "HTTP error withheld from handler; register it with accepts_http_errors to interpret non-2xx bodies"
            );
            return Some(FetchError::new(
                raw.status,
                format!("request failed with status {}", raw.status),
            ));
        }

        let outcome = {
            let mut store = self.store.lock();
            (route.handler)(&mut store, &body, &params, parsed.query())
        };

        match outcome {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(endpoint, status = raw.status, error = %err, "Handler rejected response");
                Some(FetchError::new(raw.status, err.to_string()))
            }
        }
    }

    /// Fires the refresh signal when the server build differs from ours.
    ///
    /// Signals at most once per distinct server version value.
    fn check_server_version(&self, server_version: Option<&str>) {
        let Some(server) = server_version else { return };
        if server == self.client_version {
            return;
        }

        let mut signaled = self.signaled_version.lock();
        if signaled.as_deref() == Some(server) {
            return;
        }
        *signaled = Some(server.to_owned());
        drop(signaled);

        tracing::info!(
            client_version = %self.client_version,
            server_version = %server,
            "Server runs a different build; inviting refresh"
        );
        (self.refresh)(&RefreshReason::VersionMismatch {
            server_version: server.to_owned(),
        });
    }
}

impl<S> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.read().len())
            .field("client_version", &self.client_version)
            .finish_non_exhaustive()
    }
}

/// Decodes the login-required envelope, returning its reason code.
fn decode_login_envelope(body: &Value) -> Option<u32> {
    let envelope: LoginRequiredEnvelope = serde_json::from_value(body.clone()).ok()?;
    (envelope.error == "login_required").then_some(envelope.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RawResponse, StaticTransport};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
    struct AclEntry {
        id: String,
        user: String,
    }

    #[derive(Debug, Default)]
    struct TestStore {
        acl_entries: Vec<AclEntry>,
        seen_partners: Vec<String>,
    }

    struct Harness {
        transport: Arc<StaticTransport>,
        dispatcher: Dispatcher<TestStore>,
        store: Arc<Mutex<TestStore>>,
        refreshes: Arc<Mutex<Vec<RefreshReason>>>,
    }

    fn harness() -> Harness {
        let transport = StaticTransport::shared();
        let store = Arc::new(Mutex::new(TestStore::default()));
        let refreshes: Arc<Mutex<Vec<RefreshReason>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&refreshes);
        let dispatcher = Dispatcher::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&store),
            Arc::new(move |reason: &RefreshReason| sink.lock().push(reason.clone())),
            "1.0.0",
        );
        Harness {
            transport,
            dispatcher,
            store,
            refreshes,
        }
    }

    fn register_acl_route(harness: &Harness) {
        harness.dispatcher.push_route(
            PathPattern::parse("/ac/partner/:partnerId/acl"),
            false,
            |store: &mut TestStore, body, params, _query| {
                let entries: Vec<AclEntry> = serde_json::from_value(body.clone())
                    .map_err(|_| HandlerError::invalid("<root>", "an array of ACL entries"))?;
                store.acl_entries = entries;
                if let Some(partner) = params.get("partnerId") {
                    store.seen_partners.push(partner.clone());
                }
                Ok(())
            },
        );
    }

    #[tokio::test]
    async fn test_success_runs_handler_and_mutates_store() {
        let h = harness();
        register_acl_route(&h);
        h.transport.script_json(
            "/ac/partner/p1/acl",
            200,
            &json!([
                {"id": "a1", "user": "alice"},
                {"id": "a2", "user": "bob"},
            ]),
        );

        let outcome = h.dispatcher.dispatch("/ac/partner/p1/acl").await;
        assert_eq!(outcome, None);

        let store = h.store.lock();
        assert_eq!(store.acl_entries.len(), 2);
        assert_eq!(store.acl_entries[0].user, "alice");
        assert_eq!(store.seen_partners, ["p1"]);
    }

    #[tokio::test]
    async fn test_first_registered_route_wins() {
        let h = harness();
        h.dispatcher.push_route(
            PathPattern::parse("/ac/partner/:partnerId/acl"),
            false,
            |store: &mut TestStore, _, _, _| {
                store.seen_partners.push("specific".to_owned());
                Ok(())
            },
        );
        // Registered later and also matching: must never run.
        h.dispatcher.push_route(
            PathPattern::parse("/ac/partner/:partnerId/:rest"),
            false,
            |store: &mut TestStore, _, _, _| {
                store.seen_partners.push("generic".to_owned());
                Ok(())
            },
        );
        h.transport.script_json("/ac/partner/p1/acl", 200, &json!(null));

        let outcome = h.dispatcher.dispatch("/ac/partner/p1/acl").await;
        assert_eq!(outcome, None);
        assert_eq!(h.store.lock().seen_partners, ["specific"]);
    }

    #[tokio::test]
    async fn test_no_matching_route_is_an_error_naming_the_endpoint() {
        let h = harness();
        register_acl_route(&h);
        h.transport.script_json("/ac/unknown/thing", 200, &json!({}));

        let outcome = h.dispatcher.dispatch("/ac/unknown/thing").await;
        let err = outcome.expect("must be an error");
        assert!(err.message.contains("/ac/unknown/thing"));
        assert_eq!(err.status, 200);
    }

    #[tokio::test]
    async fn test_http_error_withheld_from_plain_handler() {
        let h = harness();
        register_acl_route(&h);
        h.transport
            .script_json("/ac/partner/p1/acl", 503, &json!({"detail": "down"}));

        let outcome = h.dispatcher.dispatch("/ac/partner/p1/acl").await;
        let err = outcome.expect("must be an error");
        assert_eq!(err.status, 503);
        // The handler never ran.
        assert!(h.store.lock().seen_partners.is_empty());
    }

    #[tokio::test]
    async fn test_error_aware_handler_sees_http_errors() {
        let h = harness();
        h.dispatcher.push_route(
            PathPattern::parse("/ac/partner/:partnerId/acl"),
            true,
            |store: &mut TestStore, body, _, _| {
                store
                    .seen_partners
                    .push(format!("error-body:{}", body["detail"]));
                Ok(())
            },
        );
        h.transport
            .script_json("/ac/partner/p1/acl", 503, &json!({"detail": "down"}));

        let outcome = h.dispatcher.dispatch("/ac/partner/p1/acl").await;
        assert_eq!(outcome, None);
        assert_eq!(h.store.lock().seen_partners, ["error-body:\"down\""]);
    }

    #[tokio::test]
    async fn test_validation_failure_names_field_path() {
        let h = harness();
        register_acl_route(&h);
        h.transport
            .script_json("/ac/partner/p1/acl", 200, &json!({"not": "an array"}));

        let err = h
            .dispatcher
            .dispatch("/ac/partner/p1/acl")
            .await
            .expect("validation must fail");
        assert!(err.message.contains("<root>"));
        assert!(err.message.contains("an array of ACL entries"));
    }

    #[tokio::test]
    async fn test_transport_failure_yields_status_zero() {
        let h = harness();
        register_acl_route(&h);
        h.transport
            .script_network_error("/ac/partner/p1/acl", "connection refused");

        let err = h
            .dispatcher
            .dispatch("/ac/partner/p1/acl")
            .await
            .expect("must be an error");
        assert!(err.is_transport());
        assert!(err.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_login_envelope_fires_refresh_with_code() {
        let h = harness();
        register_acl_route(&h);
        h.transport.script_json(
            "/ac/partner/p1/acl",
            401,
            &json!({"error": "login_required", "code": 42}),
        );

        let err = h
            .dispatcher
            .dispatch("/ac/partner/p1/acl")
            .await
            .expect("must be an error");
        assert_eq!(err.status, 401);
        assert!(err.is_session_expired());

        let refreshes = h.refreshes.lock();
        assert_eq!(refreshes.len(), 1);
        assert_eq!(refreshes[0], RefreshReason::LoginRequired { code: 42 });
        // Short-circuited before the route table: the handler never ran.
        assert!(h.store.lock().seen_partners.is_empty());
    }

    #[tokio::test]
    async fn test_plain_401_without_envelope_is_a_normal_http_error() {
        let h = harness();
        register_acl_route(&h);
        h.transport
            .script_json("/ac/partner/p1/acl", 401, &json!({"detail": "nope"}));

        let err = h
            .dispatcher
            .dispatch("/ac/partner/p1/acl")
            .await
            .expect("must be an error");
        assert_eq!(err.status, 401);
        assert!(h.refreshes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_signals_once_per_version() {
        let h = harness();
        register_acl_route(&h);
        for _ in 0..3 {
            h.transport.script(
                "/ac/partner/p1/acl",
                RawResponse::json(200, &json!([])).with_version("2.0.0"),
            );
        }

        for _ in 0..3 {
            h.dispatcher.dispatch("/ac/partner/p1/acl").await;
        }

        let refreshes = h.refreshes.lock();
        assert_eq!(refreshes.len(), 1);
        assert_eq!(
            refreshes[0],
            RefreshReason::VersionMismatch {
                server_version: "2.0.0".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_version_mismatch_signals_again_for_new_version() {
        let h = harness();
        register_acl_route(&h);
        h.transport.script(
            "/ac/partner/p1/acl",
            RawResponse::json(200, &json!([])).with_version("2.0.0"),
        );
        h.transport.script(
            "/ac/partner/p1/acl",
            RawResponse::json(200, &json!([])).with_version("3.0.0"),
        );

        h.dispatcher.dispatch("/ac/partner/p1/acl").await;
        h.dispatcher.dispatch("/ac/partner/p1/acl").await;

        assert_eq!(h.refreshes.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_matching_version_stays_silent() {
        let h = harness();
        register_acl_route(&h);
        h.transport.script(
            "/ac/partner/p1/acl",
            RawResponse::json(200, &json!([])).with_version("1.0.0"),
        );

        h.dispatcher.dispatch("/ac/partner/p1/acl").await;
        assert!(h.refreshes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handler_message_error_used_verbatim() {
        let h = harness();
        h.dispatcher.push_route(
            PathPattern::parse("/ac/thing"),
            false,
            |_: &mut TestStore, _, _, _| Err(HandlerError::Message("exact words".to_owned())),
        );
        h.transport.script_json("/ac/thing", 200, &json!(null));

        let err = h.dispatcher.dispatch("/ac/thing").await.expect("error");
        assert_eq!(err.message, "exact words");
    }
}
