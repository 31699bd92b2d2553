use scanner_core::error::ScannerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `scanner-feed`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum FeedError {
    #[error("invalid url: {0}")]
    Url(String),

    #[error("failed to connect to quote stream: {0}")]
    Connect(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("quote stream read timeout: no data received for {0} seconds")]
    ReadTimeout(u64),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("event receiver dropped")]
    ChannelClosed,
}

impl FeedError {
    /// Determine if an error requires the quote stream connection to be re-established.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_terminal(&self) -> bool {
        match self {
            FeedError::Connect(_) | FeedError::ReadTimeout(_) => true,
            FeedError::Socket(error_msg) => {
                let error_lower = error_msg.to_lowercase();
                error_lower.contains("terminated")
                    || error_lower.contains("connectionclosed")
                    || error_lower.contains("connection closed")
                    || error_lower.contains("alreadyclosed")
                    || error_lower.contains("already closed")
                    || error_lower.contains("io(")
                    || error_lower.contains("io error")
                    || error_lower.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(value: url::ParseError) -> Self {
        Self::Url(value.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<ScannerError> for FeedError {
    fn from(value: ScannerError) -> Self {
        Self::Decode(value.to_string())
    }
}
