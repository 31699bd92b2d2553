//! Headless scanner session: owns the engine, feeds it quotes and reference data, and
//! publishes ranked snapshots.
//!
//! Network lookups never block quote processing. Each one runs on its own task and
//! reports back over a channel; the engine discards results for instruments it no
//! longer tracks.

use crate::{
    error::FeedError,
    reference::{ReferenceClient, ReferenceConfig, VolumeSnapshot},
    retry::RetryGate,
    websocket::{ConnectionStatus, FeedEvent, QuoteStreamClient, QuoteStreamConfig},
};
use scanner_core::{
    config::TrackedIndex,
    engine::{ReferenceRequest, ScannerEngine, ScannerSnapshot},
    types::DerivativeMetadata,
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub stream: QuoteStreamConfig,
    pub reference: ReferenceConfig,
    /// How often lookups are dispatched and a snapshot is published.
    pub snapshot_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stream: QuoteStreamConfig::default(),
            reference: ReferenceConfig::default(),
            snapshot_interval: Duration::from_secs(1),
        }
    }
}

impl RunnerConfig {
    /// Override defaults from `SCANNER_WS_URL`, `SCANNER_API_URL` and
    /// `SCANNER_SNAPSHOT_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SCANNER_WS_URL") {
            config.stream = QuoteStreamConfig {
                url,
                ..config.stream
            };
        }
        if let Ok(url) = std::env::var("SCANNER_API_URL") {
            config.reference = ReferenceConfig {
                base_url: url,
                ..config.reference
            };
        }
        config.snapshot_interval = std::env::var("SCANNER_SNAPSHOT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(config.snapshot_interval);

        config
    }
}

/// Something the runner fetches lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    Derivatives,
    Volumes,
    KeyRate,
    Indices,
    Reference(ReferenceRequest),
}

/// Outcome of one lookup task.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    Derivatives(Vec<DerivativeMetadata>),
    /// `None` when the backend has no data yet, as for the key rate and reference prices.
    Volumes(Option<VolumeSnapshot>),
    KeyRate(Option<f64>),
    Indices(Vec<TrackedIndex>),
    Reference {
        request: ReferenceRequest,
        price: Option<f64>,
    },
    Failed {
        key: LookupKey,
        error: FeedError,
    },
}

#[derive(Debug)]
pub struct ScannerRunner {
    engine: ScannerEngine,
    reference: ReferenceClient,
    gate: RetryGate<LookupKey>,
    config: RunnerConfig,
    snapshot_tx: watch::Sender<Option<ScannerSnapshot>>,
    connections: u64,
}

impl ScannerRunner {
    pub fn new(
        engine: ScannerEngine,
        config: RunnerConfig,
    ) -> Result<(Self, watch::Receiver<Option<ScannerSnapshot>>), FeedError> {
        let reference = ReferenceClient::new(&config.reference)?;
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        Ok((
            Self {
                engine,
                reference,
                gate: RetryGate::new(config.reference.retry_interval),
                config,
                snapshot_tx,
                connections: 0,
            },
            snapshot_rx,
        ))
    }

    pub fn engine(&self) -> &ScannerEngine {
        &self.engine
    }

    /// Run until the quote stream client stops or Ctrl-C is received.
    pub async fn run(mut self) -> Result<(), FeedError> {
        let mut feed = QuoteStreamClient::new(self.config.stream.clone()).start()?;
        let (lookup_tx, mut lookup_rx) = mpsc::unbounded_channel::<LookupResult>();
        let mut ticker = tokio::time::interval(self.config.snapshot_interval);
        let mut last_tick = Instant::now();

        info!(dashboard = ?self.engine.config().dashboard, "scanner runner started");

        loop {
            tokio::select! {
                event = feed.recv() => match event {
                    Some(event) => self.handle_feed_event(event),
                    None => {
                        warn!("quote stream client stopped");
                        break;
                    }
                },
                Some(result) = lookup_rx.recv() => self.apply_lookup(result),
                _ = ticker.tick() => {
                    for key in self.pending_lookups(Instant::now()) {
                        self.spawn_lookup(key, lookup_tx.clone());
                    }
                    let elapsed = last_tick.elapsed();
                    last_tick = Instant::now();
                    self.publish_snapshot(elapsed);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Message(text) => {
                // Malformed messages are logged by the engine and dropped
                let _ = self.engine.process_message(&text);
            }
            FeedEvent::Status(ConnectionStatus::Connected) => {
                self.connections += 1;
                if self.connections > 1 {
                    info!(connections = self.connections, "quote stream reconnected");
                }
                self.reset_session();
            }
            FeedEvent::Status(status) => debug!(?status, "quote stream status"),
        }
    }

    /// Start a fresh session: engine state is cleared and every lookup becomes eligible
    /// again.
    fn reset_session(&mut self) {
        self.engine.reset_session();
        self.gate.clear();
    }

    /// Lookups that should start now, already recorded in the retry gate.
    pub fn pending_lookups(&mut self, now: Instant) -> Vec<LookupKey> {
        [
            LookupKey::Derivatives,
            LookupKey::Volumes,
            LookupKey::KeyRate,
            LookupKey::Indices,
        ]
        .into_iter()
        .chain(
            self.engine
                .missing_references()
                .into_iter()
                .map(LookupKey::Reference),
        )
        .filter(|key| self.gate.try_acquire(key, now))
        .collect()
    }

    fn spawn_lookup(&self, key: LookupKey, lookup_tx: mpsc::UnboundedSender<LookupResult>) {
        let client = self.reference.clone();
        let dashboard = self.engine.config().dashboard;

        tokio::spawn(async move {
            let result = match &key {
                LookupKey::Derivatives => client
                    .fetch_derivatives()
                    .await
                    .map(LookupResult::Derivatives),
                LookupKey::Volumes => client.fetch_volumes().await.map(LookupResult::Volumes),
                LookupKey::KeyRate => client.fetch_key_rate().await.map(LookupResult::KeyRate),
                LookupKey::Indices => client
                    .list_indices(dashboard)
                    .await
                    .map(LookupResult::Indices),
                LookupKey::Reference(request) => client
                    .fetch_reference_price(&request.instrument_id, request.kind)
                    .await
                    .map(|price| LookupResult::Reference {
                        request: request.clone(),
                        price,
                    }),
            };

            let result = result.unwrap_or_else(|error| LookupResult::Failed { key, error });
            // Receiver gone means the runner has stopped
            let _ = lookup_tx.send(result);
        });
    }

    /// Feed a lookup outcome into the engine and settle its retry gate entry.
    ///
    /// Missing data and failures leave the gate entry in flight, so the key is retried
    /// after the retry interval.
    pub fn apply_lookup(&mut self, result: LookupResult) {
        match result {
            LookupResult::Derivatives(metadata) => {
                self.engine.load_derivatives(metadata);
                self.gate.succeeded(&LookupKey::Derivatives);
            }
            LookupResult::Volumes(Some(volumes)) => {
                info!(instruments = volumes.today.len(), "today volume snapshot loaded");
                self.engine.set_volume_snapshot(volumes.today);
                self.engine.set_average_volumes(volumes.average_per_day);
                self.gate.succeeded(&LookupKey::Volumes);
            }
            LookupResult::Volumes(None) => debug!("volume snapshot not available yet"),
            LookupResult::KeyRate(Some(key_rate)) => {
                self.engine.set_key_rate(key_rate);
                self.gate.succeeded(&LookupKey::KeyRate);
            }
            LookupResult::KeyRate(None) => debug!("key rate not available yet"),
            LookupResult::Indices(indices) => {
                // An empty listing keeps the configured index bar
                if !indices.is_empty() {
                    info!(count = indices.len(), "index bar loaded");
                    self.engine.set_indices(indices);
                }
                self.gate.succeeded(&LookupKey::Indices);
            }
            LookupResult::Reference {
                request,
                price: Some(price),
            } => {
                self.engine
                    .apply_reference_price(&request.instrument_id, request.kind, price);
                self.gate.succeeded(&LookupKey::Reference(request));
            }
            LookupResult::Reference {
                request,
                price: None,
            } => debug!(
                instrument = %request.instrument_id,
                kind = %request.kind,
                "reference price not available yet"
            ),
            LookupResult::Failed { key, error } => warn!(?key, %error, "lookup failed"),
        }
    }

    fn publish_snapshot(&mut self, elapsed: Duration) {
        let rate = self.engine.take_update_rate(elapsed);
        let snapshot = self.engine.snapshot();

        debug!(
            instruments = snapshot.stats.active_instruments,
            total_volume = snapshot.stats.total_volume,
            updates_per_sec = rate,
            stock_near = snapshot.stock_near.len(),
            near_far = snapshot.near_far.len(),
            gainers = snapshot.gainers.len(),
            losers = snapshot.losers.len(),
            "snapshot"
        );

        self.snapshot_tx.send_replace(Some(snapshot));
    }
}
