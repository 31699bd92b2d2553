use crate::{
    error::ScannerError,
    rank::{RankSpec, SortKey, SortOrder},
    types::InstrumentId,
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::str::FromStr;

/// Which dashboard an engine session feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dashboard {
    /// Equity vs near/far futures spreads.
    #[default]
    Futures,
    /// Gainers and losers against the session close.
    MorningSession,
    /// Gainers and losers during weekend trading.
    WeekendSession,
}

impl Dashboard {
    /// Path segment used by the index management endpoints.
    pub fn slug(&self) -> &'static str {
        match self {
            Dashboard::Futures => "futures-scanner",
            Dashboard::MorningSession => "morning-scanner",
            Dashboard::WeekendSession => "weekend-scanner",
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, Dashboard::MorningSession | Dashboard::WeekendSession)
    }
}

impl FromStr for Dashboard {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "futures" | "futures-scanner" => Ok(Dashboard::Futures),
            "morning" | "morning_session" | "morning-scanner" => Ok(Dashboard::MorningSession),
            "weekend" | "weekend_session" | "weekend-scanner" => Ok(Dashboard::WeekendSession),
            other => Err(ScannerError::UnknownDashboard(other.to_string())),
        }
    }
}

/// An index shown in the index bar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TrackedIndex {
    pub instrument_id: InstrumentId,
    pub display_name: SmolStr,
}

impl TrackedIndex {
    pub fn new(instrument_id: impl Into<InstrumentId>, display_name: impl AsRef<str>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            display_name: SmolStr::new(display_name.as_ref()),
        }
    }
}

/// Engine configuration for one dashboard session.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub dashboard: Dashboard,
    /// Central bank key rate in percent; `0` until loaded.
    pub key_rate_percent: f64,
    pub stock_near: RankSpec,
    pub stock_far: RankSpec,
    pub near_far: RankSpec,
    pub gainers: RankSpec,
    pub losers: RankSpec,
    pub indices: Vec<TrackedIndex>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let spread = RankSpec::new(SortKey::SpreadPercent, SortOrder::Desc, RankSpec::DEFAULT_LIMIT);
        Self {
            dashboard: Dashboard::default(),
            key_rate_percent: 0.0,
            stock_near: spread,
            stock_far: spread,
            near_far: spread,
            gainers: RankSpec::new(SortKey::ChangeOs, SortOrder::Desc, RankSpec::DEFAULT_LIMIT),
            // Most negative change first
            losers: RankSpec::new(SortKey::ChangeOs, SortOrder::Asc, RankSpec::DEFAULT_LIMIT),
            indices: vec![TrackedIndex::new("BBG00KDWPPW3", "IMOEX2")],
        }
    }
}

impl ScannerConfig {
    pub fn new(dashboard: Dashboard) -> Self {
        Self {
            dashboard,
            ..Self::default()
        }
    }

    pub fn with_key_rate(mut self, key_rate_percent: f64) -> Self {
        self.key_rate_percent = key_rate_percent;
        self
    }

    pub fn with_indices(mut self, indices: Vec<TrackedIndex>) -> Self {
        self.indices = indices;
        self
    }

    /// Apply the same top-N to every table.
    pub fn with_top_n(mut self, limit: usize) -> Self {
        for spec in self.tables_mut() {
            *spec = spec.with_limit(limit);
        }
        self
    }

    /// Apply the same sort order to every table.
    pub fn with_sort_order(mut self, order: SortOrder) -> Self {
        for spec in self.tables_mut() {
            *spec = spec.with_order(order);
        }
        self
    }

    /// Override defaults from `SCANNER_*` environment variables.
    ///
    /// Unset variables keep the current value; set but unparseable ones are an error.
    pub fn with_env_overrides(self) -> Result<Self, ScannerError> {
        let mut config = self;

        if let Some(dashboard) = env_var("SCANNER_DASHBOARD") {
            config.dashboard = dashboard.parse()?;
        }
        if let Some(key_rate) = env_var("SCANNER_KEY_RATE") {
            config.key_rate_percent = parse_env("SCANNER_KEY_RATE", &key_rate)?;
        }
        if let Some(top_n) = env_var("SCANNER_TOP_N") {
            config = config.with_top_n(parse_env("SCANNER_TOP_N", &top_n)?);
        }
        if let Some(order) = env_var("SCANNER_SORT_ORDER") {
            config = config.with_sort_order(order.parse()?);
        }

        Ok(config)
    }

    fn tables_mut(&mut self) -> [&mut RankSpec; 5] {
        [
            &mut self.stock_near,
            &mut self.stock_far,
            &mut self.near_far,
            &mut self.gainers,
            &mut self.losers,
        ]
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ScannerError> {
    value.trim().parse().map_err(|_| ScannerError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    })
}
