//! Spread, fair-spread and change formulas, plus the row types they produce.
//!
//! Every function here is pure. Inputs that would make a formula meaningless (a
//! non-positive divisor, a missing expiry) yield `0` for spreads and `None` for changes,
//! so no row ever carries a NaN.

use crate::{
    change::Tick,
    types::{InstrumentId, Quote, positive},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use smol_str::SmolStr;

pub const DEFAULT_LOT_SIZE: f64 = 100.0;
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Contract multiplier, falling back to [`DEFAULT_LOT_SIZE`] when missing, zero or
/// non-finite.
pub fn lot_size_or_default(multiplier: Option<f64>) -> f64 {
    positive(multiplier).unwrap_or(DEFAULT_LOT_SIZE)
}

/// Round to two decimal places, half away from zero.
///
/// Small negative values round to `0.0`, never `-0.0`.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0 + 0.0
}

/// Whole days from `today` until `expiry`, clamped at zero.
pub fn days_to_expiration(expiry: NaiveDate, today: NaiveDate) -> i64 {
    (expiry - today).num_days().max(0)
}

/// `((derivative / (equity * lot)) - 1) * 100`.
pub fn equity_derivative_spread_percent(equity: f64, derivative: f64, lot_size: f64) -> f64 {
    if equity <= 0.0 || lot_size <= 0.0 || !equity.is_finite() || !derivative.is_finite() {
        return 0.0;
    }
    ((derivative / (equity * lot_size)) - 1.0) * 100.0
}

/// `((far / near) - 1) * 100`.
pub fn pair_spread_percent(near: f64, far: f64) -> f64 {
    if near <= 0.0 || !near.is_finite() || !far.is_finite() {
        return 0.0;
    }
    ((far / near) - 1.0) * 100.0
}

/// Cost-of-carry spread for holding a position `days` days at `key_rate_percent`.
pub fn fair_spread_percent(key_rate_percent: f64, days: i64) -> f64 {
    if days <= 0 || !key_rate_percent.is_finite() {
        return 0.0;
    }
    (key_rate_percent / DAYS_PER_YEAR) * days as f64
}

/// Cost-of-carry spread between two expiries.
pub fn pair_fair_spread_percent(key_rate_percent: f64, near_days: i64, far_days: i64) -> f64 {
    if near_days <= 0 || far_days <= 0 {
        return 0.0;
    }
    fair_spread_percent(key_rate_percent, far_days - near_days)
}

/// `((current - reference) / reference) * 100`, absent when either side is unusable.
pub fn change_percent(current: Option<f64>, reference: Option<f64>) -> Option<f64> {
    let reference = positive(reference)?;
    let current = current.filter(|value| value.is_finite())?;
    Some(((current - reference) / reference) * 100.0)
}

/// Evening-session reference, falling back to the session close when the evening price
/// is not known.
pub fn evening_or_session_close(evening: Option<f64>, session: Option<f64>) -> Option<f64> {
    positive(evening).or_else(|| positive(session))
}

/// Quoted bid/ask spread relative to the mid price.
pub fn bid_ask_spread_percent(best_bid: Option<f64>, best_ask: Option<f64>) -> Option<f64> {
    let bid = positive(best_bid)?;
    let ask = positive(best_ask)?;
    if ask < bid {
        return None;
    }
    Some((ask - bid) / ((ask + bid) / 2.0) * 100.0)
}

/// Today's volume as a multiple of the historical average daily volume.
pub fn volume_excess(volume: f64, average_volume: Option<f64>) -> Option<f64> {
    let average = positive(average_volume)?;
    volume.is_finite().then(|| volume.max(0.0) / average)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    EquityVsDerivative,
    NearVsFarDerivative,
}

/// One side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct Leg<'a> {
    pub quote: &'a Quote,
    pub days_to_expiration: Option<i64>,
}

impl<'a> Leg<'a> {
    pub fn new(quote: &'a Quote, days_to_expiration: Option<i64>) -> Self {
        Self {
            quote,
            days_to_expiration,
        }
    }
}

/// A derived row comparing two instruments of one base symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub kind: ComparisonKind,
    pub base_symbol: SmolStr,
    pub instrument1: InstrumentId,
    pub instrument2: InstrumentId,
    pub symbol1: SmolStr,
    pub symbol2: SmolStr,
    pub price1: f64,
    pub price2: f64,
    pub spread_percent: f64,
    pub fair_spread_percent: f64,
    pub delta_percent: f64,
    pub volume1: f64,
    pub volume2: f64,
    pub lot_size: f64,
    /// Days to expiration of the derivative leg (the far leg for pairs).
    pub days_to_expiration: Option<i64>,
    pub best_bid1: Option<f64>,
    pub best_ask1: Option<f64>,
    pub best_bid2: Option<f64>,
    pub best_ask2: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Comparison {
    fn from_legs(
        kind: ComparisonKind,
        base_symbol: SmolStr,
        first: Leg<'_>,
        second: Leg<'_>,
        lot_size: f64,
    ) -> Option<Self> {
        let price1 = first.quote.price()?;
        let price2 = second.quote.price()?;

        Some(Self {
            kind,
            base_symbol,
            instrument1: first.quote.instrument_id.clone(),
            instrument2: second.quote.instrument_id.clone(),
            symbol1: first.quote.symbol.clone(),
            symbol2: second.quote.symbol.clone(),
            price1,
            price2,
            spread_percent: 0.0,
            fair_spread_percent: 0.0,
            delta_percent: 0.0,
            volume1: first.quote.total_volume.unwrap_or(0.0),
            volume2: second.quote.total_volume.unwrap_or(0.0),
            lot_size,
            days_to_expiration: second.days_to_expiration,
            best_bid1: first.quote.best_bid,
            best_ask1: first.quote.best_ask,
            best_bid2: second.quote.best_bid,
            best_ask2: second.quote.best_ask,
            timestamp: first.quote.event_timestamp.max(second.quote.event_timestamp),
        })
    }

    fn with_spreads(mut self, spread: f64, fair: f64) -> Self {
        self.spread_percent = spread;
        self.fair_spread_percent = fair;
        self.delta_percent = round2(spread - fair);
        self
    }

    /// Larger of the two leg volumes.
    pub fn volume(&self) -> f64 {
        self.volume1.max(self.volume2)
    }
}

/// Compare an equity against one of its derivatives.
///
/// Returns `None` when either leg has no usable current price.
pub fn compute_equity_derivative_comparison(
    base_symbol: SmolStr,
    equity: Leg<'_>,
    derivative: Leg<'_>,
    lot_size: f64,
    key_rate_percent: f64,
) -> Option<Comparison> {
    let comparison = Comparison::from_legs(
        ComparisonKind::EquityVsDerivative,
        base_symbol,
        equity,
        derivative,
        lot_size,
    )?;

    let spread =
        equity_derivative_spread_percent(comparison.price1, comparison.price2, lot_size);
    let fair = derivative
        .days_to_expiration
        .map(|days| fair_spread_percent(key_rate_percent, days))
        .unwrap_or(0.0);

    Some(comparison.with_spreads(spread, fair))
}

/// Compare the near and far derivatives of one base symbol.
pub fn compute_derivative_pair_comparison(
    base_symbol: SmolStr,
    near: Leg<'_>,
    far: Leg<'_>,
    lot_size: f64,
    key_rate_percent: f64,
) -> Option<Comparison> {
    let comparison = Comparison::from_legs(
        ComparisonKind::NearVsFarDerivative,
        base_symbol,
        near,
        far,
        lot_size,
    )?;

    let spread = pair_spread_percent(comparison.price1, comparison.price2);
    let fair = match (near.days_to_expiration, far.days_to_expiration) {
        (Some(near_days), Some(far_days)) => {
            pair_fair_spread_percent(key_rate_percent, near_days, far_days)
        }
        _ => 0.0,
    };

    Some(comparison.with_spreads(spread, fair))
}

/// Single-instrument row used by the gainers, losers and index tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteRow {
    pub instrument_id: InstrumentId,
    pub symbol: SmolStr,
    pub current_price: Option<f64>,
    pub session_close_reference_price: Option<f64>,
    pub evening_close_reference_price: Option<f64>,
    pub change_os_percent: Option<f64>,
    /// Change against the evening close, or the session close when that is unknown.
    pub change_vs_percent: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub bid_ask_spread_percent: Option<f64>,
    pub volume: f64,
    /// `volume` over the historical average daily volume.
    pub volume_excess: Option<f64>,
    pub tick: Tick,
    pub timestamp: Option<DateTime<Utc>>,
}

impl QuoteRow {
    pub fn from_quote(quote: &Quote, tick: Tick, average_volume: Option<f64>) -> Self {
        let volume = quote.total_volume.unwrap_or(0.0);
        Self {
            instrument_id: quote.instrument_id.clone(),
            symbol: quote.symbol.clone(),
            current_price: quote.current_price,
            session_close_reference_price: quote.session_close_reference_price,
            evening_close_reference_price: quote.evening_close_reference_price,
            change_os_percent: change_percent(
                quote.current_price,
                quote.session_close_reference_price,
            ),
            change_vs_percent: change_percent(
                quote.current_price,
                evening_or_session_close(
                    quote.evening_close_reference_price,
                    quote.session_close_reference_price,
                ),
            ),
            best_bid: quote.best_bid,
            best_ask: quote.best_ask,
            bid_ask_spread_percent: bid_ask_spread_percent(quote.best_bid, quote.best_ask),
            volume,
            volume_excess: volume_excess(volume, average_volume),
            tick,
            timestamp: quote.event_timestamp,
        }
    }
}

/// Index bar entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRow {
    pub instrument_id: InstrumentId,
    pub display_name: SmolStr,
    pub current_price: Option<f64>,
    pub change_os_percent: Option<f64>,
    pub change_vs_percent: Option<f64>,
    pub tick: Tick,
    pub timestamp: Option<DateTime<Utc>>,
}
