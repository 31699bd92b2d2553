use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `scanner-core`.
///
/// None of these are fatal to a scanner session: a malformed message is dropped and
/// processing continues, while configuration errors surface at start-up.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum ScannerError {
    #[error("malformed quote message: {0}")]
    MalformedMessage(String),

    #[error("quote message missing instrument identifier")]
    MissingInstrumentId,

    #[error("malformed reference data: {0}")]
    MalformedReference(String),

    #[error("unknown dashboard: {0}")]
    UnknownDashboard(String),

    #[error("unknown sort key: {0}")]
    UnknownSortKey(String),

    #[error("unknown sort order: {0}")]
    UnknownSortOrder(String),

    #[error("invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },
}

impl From<serde_json::Error> for ScannerError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedMessage(value.to_string())
    }
}
