//! Endpoint strings and query parameter access.
//!
//! An endpoint is the canonical string identity of one fetchable resource:
//! `"<pathname>?<query>"`. The fetch layer uses the full string as its
//! dedup/cache key, the pathname for handler routing, and the query part
//! for merge bucketing.
//!
//! Two contracts here are load-bearing and must never normalize:
//!
//! - [`QueryParams::query_part`] returns the **exact** substring after the
//!   first `?`. Merge rules bucket requests by byte-identical query parts,
//!   so reordering or re-encoding would silently break batching.
//! - [`ParsedEndpoint::endpoint`] returns the exact original string, byte
//!   for byte.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

const NO_VALUES: &[String] = &[];

/// Decoded query parameters plus the verbatim query substring.
///
/// Multiple occurrences of the same key accumulate in order of appearance.
/// Keys and values are percent-decoded for the accessors; the raw substring
/// is kept untouched for [`query_part`](Self::query_part).
///
/// # Examples
///
/// ```
/// use fc_core::ParsedEndpoint;
///
/// let ep = ParsedEndpoint::parse("/ac/node?meshId=m1&tag=a&tag=b");
/// let query = ep.query();
///
/// assert!(query.has("meshId"));
/// assert_eq!(query.get("meshId"), Some("m1"));
/// assert_eq!(query.all("tag"), ["a", "b"]);
/// assert_eq!(query.get_or("missing", "fallback"), "fallback");
/// assert_eq!(query.query_part(), "meshId=m1&tag=a&tag=b");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryParams {
    /// The exact substring after `?`, empty when the endpoint had none.
    raw: String,

    /// Decoded values per key, in order of appearance.
    values: FxHashMap<String, SmallVec<[String; 2]>>,
}

impl QueryParams {
    /// Parses the substring after `?` of an endpoint string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut values: FxHashMap<String, SmallVec<[String; 2]>> = FxHashMap::default();
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            values
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        Self {
            raw: raw.to_owned(),
            values,
        }
    }

    /// Returns `true` if the key appeared in the query at all.
    #[inline]
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the first value for the key, if present.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Returns the first value for the key, or the default.
    #[inline]
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Returns every value for the key, in order of appearance.
    ///
    /// Absent keys yield an empty slice.
    #[inline]
    #[must_use]
    pub fn all(&self, key: &str) -> &[String] {
        self.values.get(key).map_or(NO_VALUES, |v| v.as_slice())
    }

    /// The exact substring after `?`, byte for byte.
    ///
    /// Never reorders, re-encodes, or otherwise normalizes: merge bucketing
    /// compares this verbatim.
    #[inline]
    #[must_use]
    pub fn query_part(&self) -> &str {
        &self.raw
    }

    /// Returns `true` if the endpoint carried no query parameters.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An endpoint string split into pathname and query parameters.
///
/// # Examples
///
/// ```
/// use fc_core::ParsedEndpoint;
///
/// let ep = ParsedEndpoint::parse("/ac/partner/p1/acl?expand=user");
/// assert_eq!(ep.pathname(), "/ac/partner/p1/acl");
/// assert_eq!(ep.query().query_part(), "expand=user");
/// assert_eq!(ep.endpoint(), "/ac/partner/p1/acl?expand=user");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEndpoint {
    /// The original endpoint string, unmodified.
    endpoint: String,

    /// Byte offset of the first `?`, or the string length when absent.
    pathname_end: usize,

    /// Parsed query parameters.
    query: QueryParams,
}

impl ParsedEndpoint {
    /// Splits an endpoint string at the first literal `?`.
    ///
    /// Endpoints without a `?` parse to an empty query.
    #[must_use]
    pub fn parse(endpoint: &str) -> Self {
        let (pathname_end, query) = match endpoint.find('?') {
            Some(idx) => (idx, QueryParams::parse(&endpoint[idx + 1..])),
            None => (endpoint.len(), QueryParams::default()),
        };
        Self {
            endpoint: endpoint.to_owned(),
            pathname_end,
            query,
        }
    }

    /// The substring before the first `?`.
    #[inline]
    #[must_use]
    pub fn pathname(&self) -> &str {
        &self.endpoint[..self.pathname_end]
    }

    /// The parsed query parameters.
    #[inline]
    #[must_use]
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// The exact substring after the first `?` (empty when there was none).
    #[inline]
    #[must_use]
    pub fn query_part(&self) -> &str {
        self.query.query_part()
    }

    /// The original endpoint string, byte for byte.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
