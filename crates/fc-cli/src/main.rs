//! CLI entry point for the Fleet Console fetch layer.
//!
//! This binary exercises the fetcher against a real console backend:
//! one-shot fetches for scripting, and a polling watch mode that streams
//! store updates to the terminal.
//!
//! # Usage
//!
//! ```bash
//! fc-console [OPTIONS] <COMMAND>
//!
//! # Fetch one endpoint and print the stored payload
//! fc-console fetch /ac/mesh --base-url https://console.example.com/
//!
//! # Poll an endpoint every 10 seconds until Ctrl-C
//! fc-console watch /ac/node?meshId=m1 --poll-ms 10000
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fc_core::{FetcherConfig, ParsedEndpoint};
use fc_fetcher::{Fetcher, HttpTransport, RefreshReason, SubscribeOptions};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Operator CLI for the Fleet Console backend.
///
/// Fetches console endpoints through the same orchestration layer the UI
/// uses: debounced scheduling, merge rules, and poll intervals all apply.
#[derive(Parser)]
#[command(name = "fc-console", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the console backend.
    #[arg(short, long, global = true, env = "FC_CONSOLE_URL")]
    base_url: Option<String>,

    /// Client build version reported against the server's version header.
    #[arg(long, global = true, env = "FC_CLIENT_VERSION")]
    client_version: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Fetch one endpoint and print the stored payload.
    Fetch {
        /// Endpoint to fetch (e.g. `/ac/mesh?status=online`).
        endpoint: String,
    },

    /// Subscribe to an endpoint and stream updates until Ctrl-C.
    Watch {
        /// Endpoint to watch.
        endpoint: String,

        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        poll_ms: u64,
    },
}

// =============================================================================
// DEMO STORE
// =============================================================================

/// A minimal store: the latest payload plus per-fetch counters.
///
/// The real console keeps typed entity collections here; for the CLI the
/// raw JSON is the product.
#[derive(Debug, Default)]
struct ConsoleStore {
    /// Most recently stored payload.
    latest: Option<Value>,

    /// Number of payloads stored per top-level collection segment.
    fetched: FxHashMap<String, usize>,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// Noisy crates like `hyper` and `reqwest` are filtered to `warn` level.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Builds a [`FetcherConfig`] from CLI arguments.
///
/// # Errors
///
/// Returns an error when the resulting configuration does not validate.
fn build_config(cli: &Cli) -> color_eyre::Result<FetcherConfig> {
    let mut config = FetcherConfig::default();
    if let Some(base_url) = &cli.base_url {
        config.base_url.clone_from(base_url);
    }
    if let Some(client_version) = &cli.client_version {
        config.client_version.clone_from(client_version);
    }
    config
        .validate()
        .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;
    Ok(config)
}

/// Creates a fetcher with the catch-all payload handler registered.
///
/// Refresh invitations (stale build, expired session) surface as warnings.
fn create_fetcher(config: FetcherConfig) -> color_eyre::Result<Fetcher<ConsoleStore>> {
    let transport = Arc::new(
        HttpTransport::new(&config)
            .map_err(|e| color_eyre::eyre::eyre!("Failed to create transport: {}", e))?,
    );

    let fetcher = Fetcher::new(config, transport, ConsoleStore::default(), on_refresh);

    // The CLI treats every endpoint the same: keep the latest payload.
    fetcher.register_handler("/ac/:collection/*", false, |store: &mut ConsoleStore, body, params, _| {
        if let Some(collection) = params.get("collection") {
            *store.fetched.entry(collection.clone()).or_default() += 1;
        }
        store.latest = Some(body.clone());
        Ok(())
    });
    fetcher.register_handler("/*", false, |store: &mut ConsoleStore, body, _, _| {
        store.latest = Some(body.clone());
        Ok(())
    });

    Ok(fetcher)
}

/// Surfaces refresh invitations from the fetch layer.
fn on_refresh(reason: &RefreshReason) {
    match reason {
        RefreshReason::VersionMismatch { server_version } => {
            tracing::warn!(server_version = %server_version, "Server runs a newer build");
        }
        RefreshReason::LoginRequired { code } => {
            tracing::warn!(code, "Session expired; log in again");
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Runs a one-shot fetch with pretty-printed output.
///
/// # Errors
///
/// Returns an error when the fetch fails.
async fn run_fetch(fetcher: &Fetcher<ConsoleStore>, endpoint: &str) -> color_eyre::Result<()> {
    info!(endpoint, "Fetching");

    let subscription = fetcher.subscribe(endpoint, SubscribeOptions::default());
    if let Some(error) = subscription.fetch_now().await {
        return Err(color_eyre::eyre::eyre!(
            "Fetch failed (status {}): {}",
            error.status,
            error.message
        ));
    }

    print_payload(fetcher, endpoint)?;
    Ok(())
}

/// Subscribes with a poll interval and streams updates until Ctrl-C.
///
/// # Errors
///
/// Returns an error when output fails.
async fn run_watch(
    fetcher: &Fetcher<ConsoleStore>,
    endpoint: &str,
    poll_ms: u64,
) -> color_eyre::Result<()> {
    info!(endpoint, poll_ms, "Watching");

    let mut subscription = fetcher.subscribe(
        endpoint,
        SubscribeOptions {
            poll_interval: Some(Duration::from_millis(poll_ms)),
            ..SubscribeOptions::default()
        },
    );

    loop {
        tokio::select! {
            changed = subscription.changed() => {
                if !changed {
                    break;
                }
                let status = subscription.status();
                if status.loading {
                    continue;
                }
                match status.error {
                    Some(error) => {
                        tracing::warn!(status = error.status, message = %error.message, "Fetch failed");
                    }
                    None => print_payload(fetcher, endpoint)?,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Pretty-prints the stored payload for an endpoint.
fn print_payload(fetcher: &Fetcher<ConsoleStore>, endpoint: &str) -> color_eyre::Result<()> {
    let parsed = ParsedEndpoint::parse(endpoint);
    let payload = fetcher.with_store(|store| store.latest.clone());

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    match payload {
        Some(value) => writeln!(handle, "{}", serde_json::to_string_pretty(&value)?)?,
        None => writeln!(handle, "(no payload stored for {})", parsed.pathname())?,
    }
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Build the fetcher
    let config = build_config(&cli)?;
    let fetcher = create_fetcher(config)?;

    // 5. Route to appropriate command
    match &cli.command {
        Commands::Fetch { endpoint } => run_fetch(&fetcher, endpoint).await,
        Commands::Watch { endpoint, poll_ms } => run_watch(&fetcher, endpoint, *poll_ms).await,
    }
}
