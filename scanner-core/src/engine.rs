//! Single-owner scanner session.
//!
//! A [`ScannerEngine`] owns every piece of mutable state for one dashboard session and
//! applies quotes one at a time. Derived tables are recomputed from scratch on each
//! [`ScannerEngine::snapshot`], so the output depends only on the current quote set.

use crate::{
    change::{ChangeTracker, Tick, TrackedField},
    classify::{InstrumentClassifier, InstrumentGroup, Role},
    config::{Dashboard, ScannerConfig, TrackedIndex},
    error::ScannerError,
    metrics::{
        Comparison, IndexRow, Leg, QuoteRow, change_percent, compute_derivative_pair_comparison,
        compute_equity_derivative_comparison, days_to_expiration, evening_or_session_close,
    },
    store::QuoteStore,
    types::{DerivativeMetadata, InstrumentId, Quote, ReferenceKind},
    volume::VolumeReconstructor,
};
use chrono::{Local, NaiveDate};
use fnv::FnvHashMap;
use serde::Serialize;
use smol_str::SmolStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of applying one quote.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub instrument_id: InstrumentId,
    /// First quote seen for this instrument this session.
    pub is_new: bool,
    pub total_volume: f64,
    pub tick: Tick,
}

/// A reference price the engine is still waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceRequest {
    pub instrument_id: InstrumentId,
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AggregateStats {
    pub active_instruments: usize,
    pub total_volume: f64,
    pub updates_total: u64,
}

/// Every table a dashboard renders, ranked and truncated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannerSnapshot {
    pub dashboard: Dashboard,
    pub stock_near: Vec<Comparison>,
    pub stock_far: Vec<Comparison>,
    pub near_far: Vec<Comparison>,
    pub gainers: Vec<QuoteRow>,
    pub losers: Vec<QuoteRow>,
    pub indices: Vec<IndexRow>,
    pub stats: AggregateStats,
}

impl ScannerSnapshot {
    fn empty(dashboard: Dashboard, stats: AggregateStats) -> Self {
        Self {
            dashboard,
            stock_near: Vec::new(),
            stock_far: Vec::new(),
            near_far: Vec::new(),
            gainers: Vec::new(),
            losers: Vec::new(),
            indices: Vec::new(),
            stats,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct UpdateCounters {
    total: u64,
    since_rate: u64,
}

#[derive(Debug, Clone)]
pub struct ScannerEngine {
    config: ScannerConfig,
    store: QuoteStore,
    volumes: VolumeReconstructor,
    classifier: InstrumentClassifier,
    changes: ChangeTracker,
    ticks: FnvHashMap<InstrumentId, Tick>,
    /// Historical average daily volume per instrument.
    average_volumes: FnvHashMap<InstrumentId, f64>,
    counters: UpdateCounters,
}

impl ScannerEngine {
    pub fn new(config: ScannerConfig) -> Self {
        let mut classifier = InstrumentClassifier::new();
        classifier.track_indices(config.indices.iter().map(|index| index.instrument_id.clone()));

        Self {
            config,
            store: QuoteStore::new(),
            volumes: VolumeReconstructor::new(),
            classifier,
            changes: ChangeTracker::new(),
            ticks: FnvHashMap::default(),
            average_volumes: FnvHashMap::default(),
            counters: UpdateCounters::default(),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn store(&self) -> &QuoteStore {
        &self.store
    }

    pub fn volumes(&self) -> &VolumeReconstructor {
        &self.volumes
    }

    /// Parse and apply one inbound stream message.
    ///
    /// A malformed message is logged and dropped; engine state is left untouched.
    pub fn process_message(&mut self, text: &str) -> Result<UpdateOutcome, ScannerError> {
        match Quote::from_json(text) {
            Ok(quote) => Ok(self.process_quote(quote)),
            Err(error) => {
                warn!(%error, "dropping quote message");
                Err(error)
            }
        }
    }

    pub fn process_quote(&mut self, mut quote: Quote) -> UpdateOutcome {
        let id = quote.instrument_id.clone();
        let total_volume = self.volumes.reconcile(&mut quote);

        let tick = self
            .changes
            .observe(&id, TrackedField::CurrentPrice, quote.current_price);
        self.changes.observe(&id, TrackedField::BestBid, quote.best_bid);
        self.changes.observe(&id, TrackedField::BestAsk, quote.best_ask);
        if tick != Tick::Unchanged {
            self.ticks.insert(id.clone(), tick);
        }

        let is_new = self.store.upsert(quote).is_none();
        if is_new {
            debug!(instrument = %id, "tracking new instrument");
        }

        self.counters.total += 1;
        self.counters.since_rate += 1;

        UpdateOutcome {
            instrument_id: id,
            is_new,
            total_volume,
            tick,
        }
    }

    /// Apply a lazily loaded reference price. Results for instruments not tracked in
    /// this session are discarded.
    pub fn apply_reference_price(
        &mut self,
        id: &InstrumentId,
        kind: ReferenceKind,
        price: f64,
    ) -> bool {
        let applied = self.store.set_reference(id, kind, price);
        if applied {
            debug!(instrument = %id, %kind, price, "reference price applied");
        } else {
            debug!(instrument = %id, %kind, price, "reference price discarded");
        }
        applied
    }

    /// Reference prices this dashboard needs but does not have yet, in a stable order.
    pub fn missing_references(&self) -> Vec<ReferenceRequest> {
        let kinds: &[ReferenceKind] = match self.config.dashboard {
            Dashboard::Futures => &[],
            Dashboard::MorningSession => &[ReferenceKind::SessionClose],
            Dashboard::WeekendSession => {
                &[ReferenceKind::SessionClose, ReferenceKind::EveningClose]
            }
        };

        let mut requests = self
            .store
            .iter()
            .flat_map(|quote| {
                let wanted: &[ReferenceKind] = if self.classifier.is_index(&quote.instrument_id) {
                    &[ReferenceKind::SessionClose]
                } else {
                    kinds
                };
                wanted
                    .iter()
                    .filter(move |kind| self.store.reference(&quote.instrument_id, **kind).is_none())
                    .map(move |kind| ReferenceRequest {
                        instrument_id: quote.instrument_id.clone(),
                        kind: *kind,
                    })
            })
            .collect::<Vec<_>>();

        requests.sort();
        requests
    }

    pub fn set_key_rate(&mut self, key_rate_percent: f64) {
        if !key_rate_percent.is_finite() {
            warn!(key_rate_percent, "ignoring non-finite key rate");
            return;
        }
        info!(key_rate_percent, "key rate updated");
        self.config.key_rate_percent = key_rate_percent;
    }

    /// Replace derivative metadata wholesale.
    pub fn load_derivatives(&mut self, metadata: Vec<DerivativeMetadata>) {
        info!(count = metadata.len(), "derivative metadata loaded");
        self.classifier.load_derivatives(metadata);
    }

    /// Provide today's volume snapshot for instruments not yet observed.
    pub fn set_volume_snapshot<I>(&mut self, volumes: I)
    where
        I: IntoIterator<Item = (InstrumentId, f64)>,
    {
        self.volumes.set_snapshot(volumes);
    }

    /// Replace the historical average daily volumes used for volume excess.
    pub fn set_average_volumes<I>(&mut self, averages: I)
    where
        I: IntoIterator<Item = (InstrumentId, f64)>,
    {
        self.average_volumes = averages.into_iter().collect();
        info!(instruments = self.average_volumes.len(), "average volumes loaded");
    }

    pub fn set_indices(&mut self, indices: Vec<TrackedIndex>) {
        self.classifier
            .track_indices(indices.iter().map(|index| index.instrument_id.clone()));
        self.config.indices = indices;
    }

    pub fn classify(&self, id: &InstrumentId) -> Option<Role> {
        let quote = self.store.get(id)?;
        Some(self.classifier.classify(id, &quote.symbol, &self.store))
    }

    pub fn base_symbol_of(&self, id: &InstrumentId) -> Option<SmolStr> {
        let quote = self.store.get(id)?;
        Some(self.classifier.base_symbol_of(id, &quote.symbol))
    }

    pub fn groups(&self) -> Vec<InstrumentGroup> {
        self.classifier.group(&self.store)
    }

    pub fn stats(&self) -> AggregateStats {
        AggregateStats {
            active_instruments: self.store.len(),
            total_volume: self.volumes.grand_total(),
            updates_total: self.counters.total,
        }
    }

    /// Updates per second since the last call.
    pub fn take_update_rate(&mut self, elapsed: Duration) -> f64 {
        let count = std::mem::take(&mut self.counters.since_rate);
        let seconds = elapsed.as_secs_f64();
        if seconds > 0.0 {
            count as f64 / seconds
        } else {
            0.0
        }
    }

    /// Clear all per-session state. Derivative metadata, average volumes and configuration
    /// are kept.
    pub fn reset_session(&mut self) {
        info!(instruments = self.store.len(), "resetting scanner session");
        self.store.clear();
        self.volumes.clear();
        self.changes.clear();
        self.ticks.clear();
        self.counters = UpdateCounters::default();
    }

    pub fn snapshot(&self) -> ScannerSnapshot {
        self.snapshot_on(Local::now().date_naive())
    }

    /// Derive every table as of `today`.
    pub fn snapshot_on(&self, today: NaiveDate) -> ScannerSnapshot {
        let mut snapshot = ScannerSnapshot::empty(self.config.dashboard, self.stats());

        if self.config.dashboard.is_session() {
            self.session_tables(&mut snapshot);
        } else {
            self.futures_tables(today, &mut snapshot);
        }
        snapshot.indices = self.index_rows();

        snapshot
    }

    fn tick(&self, id: &InstrumentId) -> Tick {
        self.ticks.get(id).copied().unwrap_or_default()
    }

    fn member(&self, id: &Option<InstrumentId>) -> Option<&Quote> {
        id.as_ref().and_then(|id| self.store.get(id))
    }

    fn leg<'a>(&self, quote: &'a Quote, today: NaiveDate) -> Leg<'a> {
        let days = self
            .classifier
            .expiration(&quote.instrument_id)
            .map(|expiry| days_to_expiration(expiry, today));
        Leg::new(quote, days)
    }

    fn futures_tables(&self, today: NaiveDate, snapshot: &mut ScannerSnapshot) {
        let key_rate = self.config.key_rate_percent;
        let mut stock_near = Vec::new();
        let mut stock_far = Vec::new();
        let mut near_far = Vec::new();

        for group in self.groups() {
            let equity = self.member(&group.equity);
            let near = self.member(&group.near_derivative);
            let far = self.member(&group.far_derivative);

            if let (Some(equity), Some(near)) = (equity, near) {
                stock_near.extend(compute_equity_derivative_comparison(
                    group.base_symbol.clone(),
                    Leg::new(equity, None),
                    self.leg(near, today),
                    self.classifier.lot_size(&near.instrument_id),
                    key_rate,
                ));
            }

            if let (Some(equity), Some(far)) = (equity, far) {
                stock_far.extend(compute_equity_derivative_comparison(
                    group.base_symbol.clone(),
                    Leg::new(equity, None),
                    self.leg(far, today),
                    self.classifier.lot_size(&far.instrument_id),
                    key_rate,
                ));
            }

            if let (Some(near), Some(far)) = (near, far) {
                near_far.extend(compute_derivative_pair_comparison(
                    group.base_symbol.clone(),
                    self.leg(near, today),
                    self.leg(far, today),
                    self.classifier.lot_size(&near.instrument_id),
                    key_rate,
                ));
            }
        }

        snapshot.stock_near = self.config.stock_near.apply(stock_near);
        snapshot.stock_far = self.config.stock_far.apply(stock_far);
        snapshot.near_far = self.config.near_far.apply(near_far);
    }

    fn session_tables(&self, snapshot: &mut ScannerSnapshot) {
        let (gainers, losers): (Vec<_>, Vec<_>) = self
            .store
            .iter()
            .filter(|quote| !self.classifier.is_index(&quote.instrument_id))
            .filter(|quote| quote.price().is_some())
            .map(|quote| {
                QuoteRow::from_quote(
                    quote,
                    self.tick(&quote.instrument_id),
                    self.average_volumes.get(&quote.instrument_id).copied(),
                )
            })
            .filter(|row| row.change_os_percent.is_some_and(|change| change != 0.0))
            .partition(|row| row.change_os_percent.is_some_and(|change| change > 0.0));

        // Store iteration order is arbitrary; fix it so ranking ties are deterministic
        let by_id = |mut rows: Vec<QuoteRow>| {
            rows.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));
            rows
        };

        snapshot.gainers = self.config.gainers.apply(by_id(gainers));
        snapshot.losers = self.config.losers.apply(by_id(losers));
    }

    fn index_rows(&self) -> Vec<IndexRow> {
        self.config
            .indices
            .iter()
            .map(|index| {
                let quote = self.store.get(&index.instrument_id);
                let current_price = quote.and_then(|quote| quote.current_price);
                IndexRow {
                    instrument_id: index.instrument_id.clone(),
                    display_name: index.display_name.clone(),
                    current_price,
                    change_os_percent: change_percent(
                        current_price,
                        quote.and_then(|quote| quote.session_close_reference_price),
                    ),
                    change_vs_percent: change_percent(
                        current_price,
                        quote.and_then(|quote| {
                            evening_or_session_close(
                                quote.evening_close_reference_price,
                                quote.session_close_reference_price,
                            )
                        }),
                    ),
                    tick: self.tick(&index.instrument_id),
                    timestamp: quote.and_then(|quote| quote.event_timestamp),
                }
            })
            .collect()
    }
}

impl Default for ScannerEngine {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::SortOrder;

    fn session_engine() -> ScannerEngine {
        ScannerEngine::new(
            ScannerConfig::new(Dashboard::MorningSession)
                .with_indices(vec![TrackedIndex::new("IDX", "IMOEX2")]),
        )
    }

    #[test]
    fn test_process_message_drops_malformed() {
        let mut engine = ScannerEngine::default();
        assert!(engine.process_message("not json").is_err());
        assert!(engine.process_message(r#"{"ticker":"SBER"}"#).is_err());
        assert!(engine.store().is_empty());
        assert_eq!(engine.stats().updates_total, 0);

        let outcome = engine
            .process_message(r#"{"figi":"F1","ticker":"SBER","currentPrice":300,"totalVolume":1000}"#)
            .unwrap();
        assert!(outcome.is_new);
        assert_eq!(outcome.total_volume, 1000.0);
        assert_eq!(engine.stats().active_instruments, 1);
    }

    #[test]
    fn test_ticks_follow_price() {
        let mut engine = ScannerEngine::default();
        let first = engine.process_quote(Quote::new("F1", "SBER").with_price(100.0));
        assert_eq!(first.tick, Tick::Unchanged);

        let second = engine.process_quote(Quote::new("F1", "SBER").with_price(101.0));
        assert_eq!(second.tick, Tick::Up);
        assert!(!second.is_new);

        let third = engine.process_quote(Quote::new("F1", "SBER").with_price(100.5));
        assert_eq!(third.tick, Tick::Down);
    }

    #[test]
    fn test_session_gainers_and_losers() {
        let mut engine = session_engine();
        for (id, symbol, price, close) in [
            ("A", "AAA", 105.0, 100.0),
            ("B", "BBB", 98.0, 100.0),
            ("C", "CCC", 110.0, 100.0),
            ("D", "DDD", 100.0, 100.0),
            ("E", "EEE", 90.0, 100.0),
            ("IDX", "IMOEX2", 2_900.0, 2_800.0),
        ] {
            engine.process_quote(
                Quote::new(id, symbol)
                    .with_price(price)
                    .with_reference(ReferenceKind::SessionClose, close),
            );
        }
        // No reference yet: excluded from both tables
        engine.process_quote(Quote::new("F", "FFF").with_price(50.0));

        let snapshot = engine.snapshot();
        let ids = |rows: &[QuoteRow]| {
            rows.iter()
                .map(|row| row.instrument_id.as_str().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&snapshot.gainers), vec!["C", "A"]);
        assert_eq!(ids(&snapshot.losers), vec!["E", "B"]);
        assert!(snapshot.stock_near.is_empty());

        assert_eq!(snapshot.indices.len(), 1);
        let index = &snapshot.indices[0];
        assert_eq!(index.display_name, "IMOEX2");
        assert!((index.change_os_percent.unwrap() - 3.571_428_571_428_571).abs() < 1e-9);
    }

    #[test]
    fn test_session_volume_excess_and_spread_orders() {
        let mut engine = ScannerEngine::new(
            ScannerConfig::new(Dashboard::WeekendSession)
                .with_indices(Vec::new())
                .with_sort_order(SortOrder::VolumeExcessDesc),
        );
        engine.set_average_volumes([
            (InstrumentId::new("A"), 1_000.0),
            (InstrumentId::new("B"), 100.0),
        ]);
        for (id, volume, bid, ask) in [
            ("A", 2_000.0, 99.0, 101.0),
            ("B", 500.0, 99.9, 100.1),
            ("C", 9_000.0, 95.0, 105.0),
        ] {
            let mut quote = Quote::new(id, id)
                .with_price(110.0)
                .with_cumulative_volume(volume)
                .with_reference(ReferenceKind::SessionClose, 100.0);
            quote.best_bid = Some(bid);
            quote.best_ask = Some(ask);
            engine.process_quote(quote);
        }

        let ids = |rows: &[QuoteRow]| {
            rows.iter()
                .map(|row| row.instrument_id.as_str().to_string())
                .collect::<Vec<_>>()
        };

        // B is 5x its average, A 2x; C has no history and sorts as zero
        let snapshot = engine.snapshot();
        assert_eq!(ids(&snapshot.gainers), vec!["B", "A", "C"]);
        assert_eq!(snapshot.gainers[0].volume_excess, Some(5.0));
        assert_eq!(snapshot.gainers[2].volume_excess, None);

        engine.config.gainers = engine.config.gainers.with_order(SortOrder::SpreadDesc);
        let snapshot = engine.snapshot();
        assert_eq!(ids(&snapshot.gainers), vec!["C", "A", "B"]);

        // Averages are historical and survive a session reset
        engine.reset_session();
        assert_eq!(engine.average_volumes.len(), 2);
    }

    #[test]
    fn test_missing_references_and_late_results() {
        let mut engine = ScannerEngine::new(
            ScannerConfig::new(Dashboard::WeekendSession)
                .with_indices(vec![TrackedIndex::new("IDX", "IMOEX2")]),
        );
        engine.process_quote(Quote::new("B", "BBB").with_price(10.0));
        engine.process_quote(
            Quote::new("A", "AAA")
                .with_price(10.0)
                .with_reference(ReferenceKind::SessionClose, 9.0),
        );
        engine.process_quote(Quote::new("IDX", "IMOEX2").with_price(2_900.0));

        let expected = vec![
            ReferenceRequest {
                instrument_id: "A".into(),
                kind: ReferenceKind::EveningClose,
            },
            ReferenceRequest {
                instrument_id: "B".into(),
                kind: ReferenceKind::SessionClose,
            },
            ReferenceRequest {
                instrument_id: "B".into(),
                kind: ReferenceKind::EveningClose,
            },
            ReferenceRequest {
                instrument_id: "IDX".into(),
                kind: ReferenceKind::SessionClose,
            },
        ];
        assert_eq!(engine.missing_references(), expected);

        assert!(engine.apply_reference_price(&"B".into(), ReferenceKind::SessionClose, 9.5));
        // Instrument not tracked: discarded
        assert!(!engine.apply_reference_price(&"Z".into(), ReferenceKind::SessionClose, 1.0));
        assert_eq!(engine.missing_references().len(), 3);
    }

    #[test]
    fn test_futures_dashboard_needs_no_references() {
        let mut engine = ScannerEngine::default();
        engine.process_quote(Quote::new("F1", "SBER").with_price(1.0));
        assert!(engine.missing_references().is_empty());
    }

    #[test]
    fn test_reset_session() {
        let mut engine = session_engine();
        engine.process_quote(
            Quote::new("A", "AAA")
                .with_price(105.0)
                .with_cumulative_volume(1_000.0)
                .with_reference(ReferenceKind::SessionClose, 100.0),
        );
        engine.load_derivatives(vec![DerivativeMetadata::new("FUT", "AAAZ5")]);
        engine.reset_session();

        assert!(engine.store().is_empty());
        assert_eq!(engine.stats(), AggregateStats::default());
        assert!(engine.snapshot().gainers.is_empty());
        // Metadata survives a reset
        engine.process_quote(Quote::new("FUT", "AAAZ5").with_price(1.0));
        assert_eq!(engine.base_symbol_of(&"FUT".into()).unwrap(), "AAA");
    }

    #[test]
    fn test_take_update_rate() {
        let mut engine = ScannerEngine::default();
        for price in [1.0, 2.0, 3.0, 4.0] {
            engine.process_quote(Quote::new("F1", "SBER").with_price(price));
        }
        assert_eq!(engine.take_update_rate(Duration::from_secs(2)), 2.0);
        assert_eq!(engine.take_update_rate(Duration::from_secs(2)), 0.0);
        assert_eq!(engine.take_update_rate(Duration::ZERO), 0.0);
        assert_eq!(engine.stats().updates_total, 4);
    }

    #[test]
    fn test_key_rate_rejects_non_finite() {
        let mut engine = ScannerEngine::default();
        engine.set_key_rate(16.5);
        engine.set_key_rate(f64::NAN);
        assert_eq!(engine.config().key_rate_percent, 16.5);
    }
}
