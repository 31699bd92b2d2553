#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]

//! # Scanner Feed
//! Transport for [`scanner_core`]: the quote WebSocket client, the REST reference-data
//! client and a headless runner that drives a [`ScannerEngine`](scanner_core::engine::ScannerEngine)
//! from both.

/// All [`Error`](std::error::Error)s generated in `scanner-feed`.
pub mod error;

/// REST client for futures metadata, reference prices, volumes, key rate and indices.
pub mod reference;

/// Per-key throttle for lazily retried lookups.
pub mod retry;

/// Engine-owning session loop.
pub mod runner;

/// Idle timeout wrapper for streams.
pub mod timeout;

/// Reconnecting quote stream client.
pub mod websocket;

/// Initialise `tracing` with an [`EnvFilter`](tracing_subscriber::EnvFilter) defaulting
/// to `info`. `RUST_LOG` overrides.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
