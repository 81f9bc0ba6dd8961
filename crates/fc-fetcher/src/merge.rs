//! Request merging.
//!
//! Many views request the same kind of resource for different ids within
//! one debounce window (`/ac/node/1`, `/ac/node/2`, ...). A merge rule
//! collapses such a burst into fewer real network calls
//! (`/ac/node/1,2,3`) while completion is still broadcast to every
//! original endpoint's observers.
//!
//! Rules form a priority list like the dispatch routes: the first pattern
//! matching an endpoint's pathname claims it. Claimed requests are
//! bucketed by `(rule, exact query substring)` — the query comparison is
//! deliberately byte-identical, because handlers may rely on the original
//! parameter ordering. Buckets never outlive a flush.

use std::sync::Arc;

use fc_core::{ParsedEndpoint, PathParams, PathPattern, QueryParams};
use rustc_hash::FxHashMap;

/// A merge function: receives every claimed request's path parameters and
/// the query parameters shared by the bucket, and returns the real
/// endpoint(s) to fetch instead.
pub type MergeFn = Arc<dyn Fn(&[PathParams], &QueryParams) -> Vec<String> + Send + Sync>;

struct MergeRule {
    pattern: PathPattern,
    merge: MergeFn,
}

#[derive(Default)]
struct Bucket {
    /// Path parameters per claimed request, in claim order.
    params: Vec<PathParams>,

    /// Original endpoint strings, parallel to `params`.
    endpoints: Vec<String>,

    /// Query parameters shared by every request in the bucket.
    query: QueryParams,
}

/// One flushed merge bucket: the real endpoints to fetch and the original
/// endpoints whose observers expect the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup {
    /// The endpoints the merge function produced; these hit the network.
    pub targets: Vec<String>,

    /// The pre-merge endpoints; completion is broadcast to these.
    pub sources: Vec<String>,
}

/// Groups pending requests by registered merge rules.
///
/// # Examples
///
/// ```
/// use fc_fetcher::RequestMerger;
/// use fc_core::PathPattern;
///
/// let mut merger = RequestMerger::new();
/// merger.register_rule(PathPattern::parse("/ac/node/:nodeId"), |params, _query| {
///     let ids: Vec<&str> = params
///         .iter()
///         .filter_map(|p| p.get("nodeId").map(String::as_str))
///         .collect();
///     vec![format!("/ac/node/{}", ids.join(","))]
/// });
///
/// assert!(merger.try_match("/ac/node/1"));
/// assert!(merger.try_match("/ac/node/2"));
/// assert!(!merger.try_match("/ac/mesh/m1"));
///
/// let mut groups = Vec::new();
/// merger.flush_and_clear(|group| groups.push(group));
/// assert_eq!(groups.len(), 1);
/// assert_eq!(groups[0].targets, ["/ac/node/1,2"]);
/// ```
#[derive(Default)]
pub struct RequestMerger {
    rules: Vec<MergeRule>,
    buckets: FxHashMap<(usize, String), Bucket>,
}

impl RequestMerger {
    /// Creates a merger with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a merge rule to the priority list.
    ///
    /// Registration order is significant: the first rule whose pattern
    /// matches a pathname claims the request.
    pub fn register_rule(
        &mut self,
        pattern: PathPattern,
        merge: impl Fn(&[PathParams], &QueryParams) -> Vec<String> + Send + Sync + 'static,
    ) {
        self.rules.push(MergeRule {
            pattern,
            merge: Arc::new(merge),
        });
    }

    /// Number of registered rules.
    #[inline]
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Attempts to claim an endpoint for merging.
    ///
    /// Walks the rules in registration order; the first pattern matching
    /// the endpoint's pathname buckets the request by
    /// `(rule, exact query substring)` and returns `true`. A claimed
    /// endpoint must not be fetched individually — it will be covered by
    /// the next flush.
    pub fn try_match(&mut self, endpoint: &str) -> bool {
        let parsed = ParsedEndpoint::parse(endpoint);
        for (index, rule) in self.rules.iter().enumerate() {
            let Some(params) = rule.pattern.matches(parsed.pathname()) else {
                continue;
            };
            let bucket = self
                .buckets
                .entry((index, parsed.query_part().to_owned()))
                .or_insert_with(|| Bucket {
                    query: parsed.query().clone(),
                    ..Bucket::default()
                });
            bucket.params.push(params);
            bucket.endpoints.push(endpoint.to_owned());
            return true;
        }
        false
    }

    /// Flushes every populated bucket through its merge function.
    ///
    /// `on_group` receives the merged endpoints together with the original
    /// pre-merge endpoint list. Buckets are cleared unconditionally; no
    /// state survives into the next debounce window. A merge function
    /// returning zero endpoints violates its contract: the group is
    /// dropped with an error log instead of crashing the flush.
    pub fn flush_and_clear(&mut self, mut on_group: impl FnMut(MergeGroup)) {
        for ((rule_index, query_part), bucket) in self.buckets.drain() {
            let Some(rule) = self.rules.get(rule_index) else {
                continue;
            };
            let targets = (rule.merge)(&bucket.params, &bucket.query);
            if targets.is_empty() {
                tracing::error!(
                    pattern = %rule.pattern.pattern(),
                    query = %query_part,
                    requests = bucket.endpoints.len(),
                    "Merge function returned no endpoints for a populated bucket"
                );
                continue;
            }
            on_group(MergeGroup {
                targets,
                sources: bucket.endpoints,
            });
        }
    }
}

impl std::fmt::Debug for RequestMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMerger")
            .field("rules", &self.rules.len())
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}
