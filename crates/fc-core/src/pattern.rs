//! Express-style path patterns.
//!
//! Handler and merge-rule registration declare interest in pathnames via
//! route-style patterns such as `/ac/partner/:partnerId/acl/:aclId/user`.
//! A [`PathPattern`] compiles one such pattern once, at registration time,
//! and extracts named parameters from concrete request paths.
//!
//! Registration order matters to the callers: route tables are priority
//! lists, the first matching pattern wins. The pattern itself is immutable
//! after parsing.

use percent_encoding::percent_decode_str;
use rustc_hash::FxHashMap;

/// Named parameters extracted from a matched path.
pub type PathParams = FxHashMap<String, String>;

/// One compiled segment of a path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Must equal the path segment verbatim.
    Literal(String),

    /// Matches any one segment, capturing it under the given name.
    Param(String),

    /// Trailing `*`: matches the remainder of the path, if any.
    Wildcard,
}

/// A compiled Express-style path pattern.
///
/// Supports colon-prefixed named segments (`:id`) and an optional trailing
/// wildcard segment (`*`). Parameter values are percent-decoded; a segment
/// that does not decode to valid UTF-8 fails the whole match.
///
/// # Examples
///
/// ```
/// use fc_core::PathPattern;
///
/// let pattern = PathPattern::parse("/ac/partner/:partnerId/acl/:aclId");
/// let params = pattern.matches("/ac/partner/p1/acl/42").unwrap();
///
/// assert_eq!(params["partnerId"], "p1");
/// assert_eq!(params["aclId"], "42");
/// assert!(pattern.matches("/ac/partner/p1").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    /// The original pattern string, kept for diagnostics.
    pattern: String,

    /// Compiled segments in path order.
    segments: Vec<Segment>,

    /// Ordered parameter names, first occurrence only.
    keys: Vec<String>,
}

impl PathPattern {
    /// Compiles a pattern string.
    ///
    /// Any string compiles; segments starting with `:` become named
    /// parameters, a final `*` segment becomes a wildcard, everything else
    /// is literal. Duplicate parameter names are kept once (first wins).
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let raw_segments: Vec<&str> = split_path(pattern).collect();
        let last = raw_segments.len().saturating_sub(1);

        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut keys = Vec::new();
        for (idx, raw) in raw_segments.iter().enumerate() {
            if let Some(name) = raw.strip_prefix(':') {
                if !keys.iter().any(|k| k == name) {
                    keys.push(name.to_owned());
                }
                segments.push(Segment::Param(name.to_owned()));
            } else if *raw == "*" && idx == last {
                segments.push(Segment::Wildcard);
            } else {
                segments.push(Segment::Literal((*raw).to_owned()));
            }
        }

        Self {
            pattern: pattern.to_owned(),
            segments,
            keys,
        }
    }

    /// The original pattern string.
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Ordered named parameter keys (first occurrence of each).
    #[inline]
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Matches a concrete pathname, extracting named parameters.
    ///
    /// Returns `None` when the path does not fit the pattern, or when any
    /// captured segment fails percent-decoding (logged, never propagated).
    /// When the same parameter name appears twice in the pattern, the first
    /// captured value wins; later ones never overwrite it.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let path_segments: Vec<&str> = split_path(path).collect();

        let has_wildcard = matches!(self.segments.last(), Some(Segment::Wildcard));
        let fixed_len = if has_wildcard {
            self.segments.len() - 1
        } else {
            self.segments.len()
        };

        if has_wildcard {
            if path_segments.len() < fixed_len {
                return None;
            }
        } else if path_segments.len() != fixed_len {
            return None;
        }

        let mut params = PathParams::default();
        for (segment, value) in self.segments.iter().zip(&path_segments) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != value {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let decoded = match percent_decode_str(value).decode_utf8() {
                        Ok(decoded) => decoded.into_owned(),
                        Err(err) => {
                            tracing::warn!(
                                pattern = %self.pattern,
                                path = %path,
                                segment = %value,
                                error = %err,
                                "Path parameter failed percent-decoding; treating as no match"
                            );
                            return None;
                        }
                    };
                    // First occurrence wins for duplicate names.
                    params.entry(name.clone()).or_insert(decoded);
                }
                Segment::Wildcard => {}
            }
        }

        Some(params)
    }
}

/// Splits a path on `/`, ignoring a single leading slash.
fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}
