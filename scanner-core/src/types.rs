//! Core data types for quotes and derivative reference data.
//!
//! Wire types (`QuoteMessage`, `FuturesListing`) match the JSON shapes delivered by the
//! quote stream and the REST endpoints. They are normalised into the domain types
//! (`Quote`, `DerivativeMetadata`) the engine works with.

use crate::error::ScannerError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;

/// Stable instrument identifier (exchange FIGI).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct InstrumentId(pub SmolStr);

impl InstrumentId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for InstrumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for InstrumentId {
    fn from(value: String) -> Self {
        Self(SmolStr::from(value))
    }
}

/// Which lazily loaded reference price a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Official close of the regular trading session ("OS").
    SessionClose,
    /// Close of the evening trading session ("VS").
    EveningClose,
}

impl ReferenceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReferenceKind::SessionClose => "OS",
            ReferenceKind::EveningClose => "VS",
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Latest known market snapshot of one instrument.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Quote {
    pub instrument_id: InstrumentId,
    pub symbol: SmolStr,
    pub current_price: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_bid_size: Option<f64>,
    pub best_ask: Option<f64>,
    pub best_ask_size: Option<f64>,
    pub session_close_reference_price: Option<f64>,
    pub evening_close_reference_price: Option<f64>,
    /// Volume reported by this single message.
    pub traded_volume_delta: Option<f64>,
    /// Server running total for the trading day.
    pub traded_volume_cumulative: Option<f64>,
    /// Reconstructed running total, written back by the volume layer.
    pub total_volume: Option<f64>,
    pub event_timestamp: Option<DateTime<Utc>>,
}

impl Quote {
    pub fn new(instrument_id: impl Into<InstrumentId>, symbol: impl AsRef<str>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            symbol: SmolStr::new(symbol.as_ref()),
            ..Default::default()
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.current_price = Some(price);
        self
    }

    pub fn with_cumulative_volume(mut self, volume: f64) -> Self {
        self.traded_volume_cumulative = Some(volume);
        self
    }

    pub fn with_volume_delta(mut self, volume: f64) -> Self {
        self.traded_volume_delta = Some(volume);
        self
    }

    pub fn with_reference(mut self, kind: ReferenceKind, price: f64) -> Self {
        *self.reference_mut(kind) = Some(price);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event_timestamp = Some(timestamp);
        self
    }

    /// Parse a single inbound stream message.
    pub fn from_json(text: &str) -> Result<Self, ScannerError> {
        let message = serde_json::from_str::<QuoteMessage>(text)?;
        Quote::try_from(message)
    }

    pub fn reference(&self, kind: ReferenceKind) -> Option<f64> {
        match kind {
            ReferenceKind::SessionClose => self.session_close_reference_price,
            ReferenceKind::EveningClose => self.evening_close_reference_price,
        }
    }

    pub fn reference_mut(&mut self, kind: ReferenceKind) -> &mut Option<f64> {
        match kind {
            ReferenceKind::SessionClose => &mut self.session_close_reference_price,
            ReferenceKind::EveningClose => &mut self.evening_close_reference_price,
        }
    }

    /// Current price if it is usable in a formula.
    pub fn price(&self) -> Option<f64> {
        positive(self.current_price)
    }
}

/// Quote message envelope as delivered by the stream.
///
/// Field names follow the backend's camelCase JSON. `closePrice` is the legacy name of
/// the session close and is only consulted when `closePriceOS` is absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteMessage {
    #[serde(default)]
    pub figi: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub current_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub best_bid: Option<f64>,
    #[serde(default, alias = "bestBidQuantity", deserialize_with = "de_opt_lenient_f64")]
    pub best_bid_size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub best_ask: Option<f64>,
    #[serde(default, alias = "bestAskQuantity", deserialize_with = "de_opt_lenient_f64")]
    pub best_ask_size: Option<f64>,
    #[serde(default, rename = "closePriceOS", deserialize_with = "de_opt_lenient_f64")]
    pub close_price_os: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub close_price: Option<f64>,
    #[serde(default, rename = "closePriceVS", deserialize_with = "de_opt_lenient_f64")]
    pub close_price_vs: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
}

/// Timestamps arrive either as epoch milliseconds or as ISO-8601 text. Anything else is
/// kept so the rest of the message still parses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(String),
    Other(serde_json::Value),
}

impl WireTimestamp {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(millis) => DateTime::from_timestamp_millis(*millis),
            WireTimestamp::Text(text) => parse_timestamp(text),
            WireTimestamp::Other(_) => None,
        }
    }
}

impl TryFrom<QuoteMessage> for Quote {
    type Error = ScannerError;

    fn try_from(message: QuoteMessage) -> Result<Self, Self::Error> {
        let figi = message
            .figi
            .map(|figi| figi.trim().to_string())
            .filter(|figi| !figi.is_empty())
            .ok_or(ScannerError::MissingInstrumentId)?;

        Ok(Self {
            instrument_id: InstrumentId::from(figi),
            symbol: message.ticker.map(SmolStr::from).unwrap_or_default(),
            current_price: message.current_price,
            best_bid: message.best_bid,
            best_bid_size: message.best_bid_size,
            best_ask: message.best_ask,
            best_ask_size: message.best_ask_size,
            session_close_reference_price: positive(message.close_price_os)
                .or(positive(message.close_price)),
            evening_close_reference_price: positive(message.close_price_vs),
            traded_volume_delta: message.volume,
            traded_volume_cumulative: message.total_volume,
            total_volume: None,
            event_timestamp: message.timestamp.as_ref().and_then(WireTimestamp::to_utc),
        })
    }
}

/// Static per-future reference data, loaded once at start-up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivativeMetadata {
    pub instrument_id: InstrumentId,
    pub ticker: SmolStr,
    pub underlying_symbol: Option<SmolStr>,
    pub expiration_date: Option<NaiveDate>,
    pub contract_multiplier: Option<f64>,
    pub asset_type: Option<SmolStr>,
}

impl DerivativeMetadata {
    pub fn new(instrument_id: impl Into<InstrumentId>, ticker: impl AsRef<str>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            ticker: SmolStr::new(ticker.as_ref()),
            underlying_symbol: None,
            expiration_date: None,
            contract_multiplier: None,
            asset_type: None,
        }
    }

    pub fn with_underlying(mut self, symbol: impl AsRef<str>) -> Self {
        self.underlying_symbol = Some(SmolStr::new(symbol.as_ref()));
        self
    }

    pub fn with_expiration(mut self, date: NaiveDate) -> Self {
        self.expiration_date = Some(date);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.contract_multiplier = Some(multiplier);
        self
    }
}

/// Response body of the futures reference endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FuturesListing {
    #[serde(default)]
    pub futures: Vec<FutureRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FutureRecord {
    pub figi: String,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub basic_asset: Option<String>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub basic_asset_size: Option<f64>,
    #[serde(default)]
    pub asset_type: Option<String>,
}

impl From<FutureRecord> for DerivativeMetadata {
    fn from(record: FutureRecord) -> Self {
        Self {
            instrument_id: InstrumentId::from(record.figi),
            ticker: record.ticker.map(SmolStr::from).unwrap_or_default(),
            underlying_symbol: record
                .basic_asset
                .map(|asset| asset.trim().to_string())
                .filter(|asset| !asset.is_empty())
                .map(SmolStr::from),
            expiration_date: record.expiration_date.as_deref().and_then(parse_date),
            contract_multiplier: record.basic_asset_size,
            asset_type: record.asset_type.map(SmolStr::from),
        }
    }
}

impl FuturesListing {
    pub fn from_json(text: &str) -> Result<Self, ScannerError> {
        serde_json::from_str(text).map_err(|error| ScannerError::MalformedReference(error.to_string()))
    }

    /// Normalise into metadata, skipping records without a usable identifier.
    pub fn into_metadata(self) -> Vec<DerivativeMetadata> {
        self.futures
            .into_iter()
            .filter(|record| !record.figi.trim().is_empty())
            .map(DerivativeMetadata::from)
            .collect()
    }
}

/// Filter an optional number down to a finite, strictly positive value.
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite() && *value > 0.0)
}

/// Parse an expiration date from either a plain date or a full timestamp.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.date_naive());
    }
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(timestamp.date());
    }
    text.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Parse an event timestamp. Zone-less timestamps are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|timestamp| timestamp.and_utc())
}

/// Accept JSON numbers, numeric strings and null.
pub fn de_opt_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(f64),
        Text(String),
    }

    Ok(
        match Option::<Lenient>::deserialize(deserializer)? {
            Some(Lenient::Number(value)) => Some(value),
            Some(Lenient::Text(text)) => text.trim().parse::<f64>().ok(),
            None => None,
        }
        .filter(|value| value.is_finite()),
    )
}
