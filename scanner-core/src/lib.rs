#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments, type_alias_bounds)]

//! # Scanner Core
//! Streaming quote aggregation engine behind the futures spread, session gainers/losers
//! and index bar dashboards.
//!
//! Quotes are applied one at a time to a [`ScannerEngine`](engine::ScannerEngine), which
//! reconstructs per-instrument traded volume, groups instruments by base symbol, pairs
//! equities with their near and far futures and ranks the derived rows.
//!
//! Everything in this crate is synchronous and free of I/O. Transport lives in
//! `scanner-feed`.
//!
//! ## Example
//! ```rust
//! use scanner_core::{
//!     config::{Dashboard, ScannerConfig},
//!     engine::ScannerEngine,
//! };
//!
//! let mut engine = ScannerEngine::new(ScannerConfig::new(Dashboard::MorningSession));
//! engine
//!     .process_message(r#"{"figi":"BBG004730N88","ticker":"SBER","currentPrice":301.5,"closePriceOS":300.0}"#)
//!     .unwrap();
//!
//! let snapshot = engine.snapshot();
//! assert_eq!(snapshot.gainers.len(), 1);
//! ```

/// Up/down change highlighting.
pub mod change;

/// Base-symbol grouping and near/far futures assignment.
pub mod classify;

/// Dashboard and ranking configuration.
pub mod config;

/// Single-owner scanner session producing ranked snapshots.
pub mod engine;

/// All [`Error`](std::error::Error)s generated in `scanner-core`.
pub mod error;

/// Spread, fair-spread and change formulas.
pub mod metrics;

/// Sort-and-truncate ranking.
pub mod rank;

/// Latest-quote table with set-once reference prices.
pub mod store;

/// Quote, derivative metadata and wire types.
pub mod types;

/// Monotonic traded volume reconstruction.
pub mod volume;

pub use engine::{ScannerEngine, ScannerSnapshot};
pub use error::ScannerError;
pub use types::{DerivativeMetadata, InstrumentId, Quote, ReferenceKind};
