//! Core types for the Fleet Console fetch layer.
//!
//! This crate provides the synchronous foundations used across the
//! workspace:
//!
//! - [`ParsedEndpoint`] / [`QueryParams`] — endpoint string identity and
//!   query access
//! - [`PathPattern`] — Express-style route patterns for handler dispatch
//! - [`FetchError`] — the one error shape crossing to subscribers
//! - [`FetcherConfig`] — connection and scheduling settings
//!
//! Nothing here performs I/O; the async orchestration lives in
//! `fc-fetcher`.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod pattern;

// Re-export configuration types
pub use config::FetcherConfig;

// Re-export endpoint types
pub use endpoint::{ParsedEndpoint, QueryParams};

// Re-export error types
pub use error::{ConfigError, FetchError, MERGED_ERRORS_STATUS, TRANSPORT_FAILURE_STATUS};

// Re-export pattern types
pub use pattern::{PathParams, PathPattern};
