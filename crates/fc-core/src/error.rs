//! Error types for the fc-core crate.
//!
//! This module provides [`FetchError`], the only error shape that crosses
//! from the fetch layer to its consumers, and [`ConfigError`] for
//! configuration validation failures.

/// Synthetic status code meaning "multiple underlying errors were merged".
///
/// Used when several sub-requests of one merge group fail independently and
/// their outcomes have to be collapsed into a single error for the original
/// subscribers. The value has no meaning beyond "more than one".
pub const MERGED_ERRORS_STATUS: u16 = 666;

/// Synthetic status code for transport-level failures.
///
/// Network errors produce no HTTP status at all; `0` is outside the valid
/// HTTP range and marks them apart from server-produced errors.
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// The error shape delivered to every fetch subscriber.
///
/// Carries the HTTP status (or one of the synthetic sentinels above) and a
/// human-readable message. This is deliberately flat: subscribers display
/// it, they do not branch on rich error structure.
///
/// # Examples
///
/// ```
/// use fc_core::FetchError;
///
/// let err = FetchError::new(404, "no such partner");
/// assert_eq!(err.status, 404);
/// assert!(err.to_string().contains("no such partner"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize)]
#[error("fetch failed with status {status}: {message}")]
pub struct FetchError {
    /// HTTP status of the failed response, or a synthetic sentinel
    /// ([`TRANSPORT_FAILURE_STATUS`], [`MERGED_ERRORS_STATUS`]).
    pub status: u16,

    /// Human-readable description of the failure.
    pub message: String,
}

impl FetchError {
    /// Creates a new fetch error.
    #[inline]
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport-level error (no HTTP response was received).
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TRANSPORT_FAILURE_STATUS, message)
    }

    /// Collapses the outcomes of several failed sub-requests into one error.
    ///
    /// A single failure is passed through unchanged. Two or more failures
    /// produce the [`MERGED_ERRORS_STATUS`] sentinel with the individual
    /// messages concatenated.
    ///
    /// # Examples
    ///
    /// ```
    /// use fc_core::{FetchError, MERGED_ERRORS_STATUS};
    ///
    /// let merged = FetchError::merged(vec![
    ///     FetchError::new(500, "a failed"),
    ///     FetchError::new(502, "b failed"),
    /// ]);
    /// assert_eq!(merged.status, MERGED_ERRORS_STATUS);
    /// assert!(merged.message.contains("a failed"));
    /// assert!(merged.message.contains("b failed"));
    /// ```
    #[must_use]
    pub fn merged(mut errors: Vec<Self>) -> Self {
        if errors.len() == 1 {
            // Vec is non-empty here, but stay panic-free regardless.
            return errors.remove(0);
        }
        let message = errors
            .iter()
            .map(|e| format!("[{}] {}", e.status, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self::new(MERGED_ERRORS_STATUS, message)
    }

    /// Returns `true` if this error collapses multiple underlying failures.
    #[inline]
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        self.status == MERGED_ERRORS_STATUS
    }

    /// Returns `true` if the request never produced an HTTP response.
    #[inline]
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        self.status == TRANSPORT_FAILURE_STATUS
    }

    /// Returns `true` if the server rejected the session (HTTP 401).
    #[inline]
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        self.status == 401
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The base URL could not be parsed as an absolute URL.
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The offending URL string.
        url: String,
        /// Explanation of why the URL is invalid.
        reason: String,
    },

    /// The client build version is empty.
    #[error("client version must not be empty")]
    EmptyClientVersion,

    /// The version response header name is empty.
    #[error("version header name must not be empty")]
    EmptyVersionHeader,
}
