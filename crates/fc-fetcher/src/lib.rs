//! Request orchestration for the Fleet Console.
//!
//! This crate is the data-fetching core behind the console UI: it maps
//! declared endpoint patterns to response handlers, deduplicates and
//! debounces concurrent requests, merges per-id requests into batched
//! calls, polls endpoints at the smallest subscribed interval, and
//! notifies observers of loading/error/success transitions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Subscription / SubscriptionSet        (UI-facing, drop = leave)  │
//! └───────────────┬──────────────────────────────────────────────────┘
//!                 │ register_interest / fetch_now
//!                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Fetcher        waiting ─ debounce ─► pending ─► idle             │
//! │                │                        ▲                        │
//! │                ▼                        │                        │
//! │          RequestMerger            FetchObservers (per endpoint)  │
//! │          (batch per rule)         + PollTracker (min interval)   │
//! └───────────────┬──────────────────────────────────────────────────┘
//!                 │ dispatch(endpoint)
//!                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Dispatcher     version check ► 401 envelope ► route walk ►       │
//! │                handler(store, body, params, query)               │
//! └───────────────┬──────────────────────────────────────────────────┘
//!                 │ GET
//!                 ▼
//!           Transport (reqwest / canned responses)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use fc_core::FetcherConfig;
//! use fc_fetcher::{Fetcher, HttpTransport, SubscribeOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Store {
//!     mesh_names: Vec<String>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FetcherConfig {
//!         base_url: "https://console.example.com/".to_owned(),
//!         ..FetcherConfig::default()
//!     };
//!     let transport = Arc::new(HttpTransport::new(&config)?);
//!     let fetcher = Fetcher::new(config, transport, Store::default(), |reason| {
//!         eprintln!("please refresh: {reason:?}");
//!     });
//!
//!     fetcher.register_handler("/ac/mesh", false, |store: &mut Store, body, _, _| {
//!         store.mesh_names = serde_json::from_value(body.clone())?;
//!         Ok(())
//!     });
//!
//!     let mut subscription = fetcher.subscribe(
//!         "/ac/mesh",
//!         SubscribeOptions {
//!             poll_interval: Some(Duration::from_secs(30)),
//!             ..SubscribeOptions::default()
//!         },
//!     );
//!
//!     while subscription.changed().await {
//!         let status = subscription.status();
//!         if !status.loading {
//!             let names = fetcher.with_store(|s| s.mesh_names.clone());
//!             println!("meshes: {names:?} (error: {:?})", status.error);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! All bookkeeping lives behind short-lived locks; observer callbacks run
//! outside of them and may re-enter the fetcher. Store mutation happens
//! only inside handler invocations, serialized by the store mutex. There
//! is no mid-flight cancellation: dropping a subscription removes its
//! observer, so a late result completes into silence. Requests carry no
//! timeout.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod dispatch;
pub mod fetcher;
pub mod merge;
pub mod observers;
pub mod poll;
pub mod subscribe;
pub mod transport;

// Re-export dispatch types
pub use dispatch::{Dispatcher, Handler, HandlerError, RefreshReason, RefreshSignal};

// Re-export the orchestrator
pub use fetcher::Fetcher;

// Re-export merge types
pub use merge::{MergeFn, MergeGroup, RequestMerger};

// Re-export observer types
pub use observers::{FetchObservers, FetchUpdate, NextFetch, ObserverId};

// Re-export poll types
pub use poll::{PollHook, PollTracker};

// Re-export subscription types
pub use subscribe::{FetchStatus, SubscribeOptions, Subscription, SubscriptionSet};

// Re-export transport types
pub use transport::{HttpTransport, RawResponse, StaticTransport, Transport, TransportError};
