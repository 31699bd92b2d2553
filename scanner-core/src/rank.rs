//! Sort-and-truncate over derived rows.
//!
//! The configuration surface couples volume, volume-excess and bid/ask-spread sorting into
//! the order (`volume_desc`, `volume_excess_desc`, `spread_desc`, ...) the way the
//! dashboards expose it. [`RankSpec::resolve`] turns that into an orthogonal
//! (key, direction) pair before sorting.

use crate::{
    error::ScannerError,
    metrics::{Comparison, QuoteRow},
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, str::FromStr};

/// Numeric field a table is ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[serde(alias = "spread", alias = "spreadPercent")]
    SpreadPercent,
    #[serde(alias = "fair", alias = "fairSpreadPercent")]
    FairSpreadPercent,
    #[serde(alias = "delta", alias = "deltaPercent")]
    DeltaPercent,
    #[serde(alias = "changeOS")]
    ChangeOs,
    #[serde(alias = "price_vs", alias = "priceVS")]
    ChangeVs,
    Volume,
    /// Volume over the historical average daily volume.
    #[serde(alias = "volumeExcess")]
    VolumeExcess,
    #[serde(alias = "bidAskSpreadPercent")]
    BidAskSpreadPercent,
}

impl FromStr for SortKey {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "spread" | "spread_percent" | "spreadPercent" => Ok(SortKey::SpreadPercent),
            "fair" | "fair_spread_percent" | "fairSpreadPercent" => {
                Ok(SortKey::FairSpreadPercent)
            }
            "delta" | "delta_percent" | "deltaPercent" => Ok(SortKey::DeltaPercent),
            "change_os" | "changeOS" => Ok(SortKey::ChangeOs),
            "change_vs" | "price_vs" | "priceVS" => Ok(SortKey::ChangeVs),
            "volume" => Ok(SortKey::Volume),
            "volume_excess" | "volumeExcess" => Ok(SortKey::VolumeExcess),
            "bid_ask_spread" | "bid_ask_spread_percent" | "bidAskSpreadPercent" => {
                Ok(SortKey::BidAskSpreadPercent)
            }
            other => Err(ScannerError::UnknownSortKey(other.to_string())),
        }
    }
}

/// Sort order as exposed on the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
    VolumeAsc,
    VolumeDesc,
    /// Largest volume excess first.
    VolumeExcessDesc,
    /// Widest bid/ask spread first.
    SpreadDesc,
}

impl FromStr for SortOrder {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            "volume_asc" => Ok(SortOrder::VolumeAsc),
            "volume_desc" => Ok(SortOrder::VolumeDesc),
            "volume_excess_desc" => Ok(SortOrder::VolumeExcessDesc),
            "spread_desc" => Ok(SortOrder::SpreadDesc),
            other => Err(ScannerError::UnknownSortOrder(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

/// How one table is ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RankSpec {
    pub sort_key: SortKey,
    pub sort_order: SortOrder,
    pub limit: usize,
}

impl RankSpec {
    pub const DEFAULT_LIMIT: usize = 15;

    pub fn new(sort_key: SortKey, sort_order: SortOrder, limit: usize) -> Self {
        Self {
            sort_key,
            sort_order,
            limit,
        }
    }

    pub fn with_limit(self, limit: usize) -> Self {
        Self { limit, ..self }
    }

    pub fn with_order(self, sort_order: SortOrder) -> Self {
        Self { sort_order, ..self }
    }

    /// Effective key and direction. Every order other than `asc`/`desc` overrides the
    /// configured key.
    pub fn resolve(&self) -> (SortKey, Direction) {
        match self.sort_order {
            SortOrder::Asc => (self.sort_key, Direction::Ascending),
            SortOrder::Desc => (self.sort_key, Direction::Descending),
            SortOrder::VolumeAsc => (SortKey::Volume, Direction::Ascending),
            SortOrder::VolumeDesc => (SortKey::Volume, Direction::Descending),
            SortOrder::VolumeExcessDesc => (SortKey::VolumeExcess, Direction::Descending),
            SortOrder::SpreadDesc => (SortKey::BidAskSpreadPercent, Direction::Descending),
        }
    }

    pub fn apply<T: Rankable>(&self, rows: Vec<T>) -> Vec<T> {
        let (key, direction) = self.resolve();
        rank(rows, key, direction, self.limit)
    }
}

/// A row that can be ranked. Keys a row does not carry return `None`.
pub trait Rankable {
    fn sort_value(&self, key: SortKey) -> Option<f64>;
}

impl Rankable for Comparison {
    fn sort_value(&self, key: SortKey) -> Option<f64> {
        match key {
            SortKey::SpreadPercent => Some(self.spread_percent),
            SortKey::FairSpreadPercent => Some(self.fair_spread_percent),
            SortKey::DeltaPercent => Some(self.delta_percent),
            SortKey::Volume => Some(self.volume()),
            SortKey::ChangeOs
            | SortKey::ChangeVs
            | SortKey::VolumeExcess
            | SortKey::BidAskSpreadPercent => None,
        }
    }
}

impl Rankable for QuoteRow {
    fn sort_value(&self, key: SortKey) -> Option<f64> {
        match key {
            SortKey::ChangeOs => self.change_os_percent,
            SortKey::ChangeVs => self.change_vs_percent,
            SortKey::Volume => Some(self.volume),
            SortKey::VolumeExcess => self.volume_excess,
            SortKey::BidAskSpreadPercent => self.bid_ask_spread_percent,
            SortKey::SpreadPercent | SortKey::FairSpreadPercent | SortKey::DeltaPercent => None,
        }
    }
}

/// Stable sort by `key` in `direction`, then keep the first `limit` rows.
///
/// Rows without a finite value for `key` sort as `0`. Numerically equal values (`-0.0`
/// and `0.0` included) keep their input order.
pub fn rank<T: Rankable>(mut rows: Vec<T>, key: SortKey, direction: Direction, limit: usize) -> Vec<T> {
    let value = |row: &T| {
        row.sort_value(key)
            .filter(|value| value.is_finite())
            .unwrap_or(0.0)
    };

    rows.sort_by(|a, b| {
        let ordering = value(a)
            .partial_cmp(&value(b))
            .unwrap_or(Ordering::Equal);
        match direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    });
    rows.truncate(limit);
    rows
}
