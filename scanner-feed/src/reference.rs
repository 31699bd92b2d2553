//! REST client for reference data: futures metadata, lazily loaded reference prices,
//! today's and historical average volumes, the key rate and index bar management.
//!
//! Missing data is not an error. A non-2xx reply to a lookup means "no data yet" and
//! comes back as `Ok(None)`, leaving the caller to retry on a later trigger.

use crate::error::FeedError;
use fnv::FnvHashMap;
use scanner_core::{
    config::{Dashboard, TrackedIndex},
    types::{DerivativeMetadata, FuturesListing, InstrumentId, ReferenceKind},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::debug;
use url::Url;

/// Keys a reference endpoint may wrap its scalar in.
const SCALAR_KEYS: [&str; 5] = ["price", "value", "closePrice", "keyRate", "rate"];

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceConfig {
    /// Backend base url, e.g. `http://127.0.0.1:8088`.
    pub base_url: String,
    pub request_timeout: Duration,
    /// Minimum spacing between lookups of the same key.
    pub retry_interval: Duration,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            request_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(30),
        }
    }
}

impl ReferenceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Volume reference data from one `/api/price-cache/volumes` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeSnapshot {
    /// Volume traded so far today, the baseline for volume reconstruction.
    pub today: FnvHashMap<InstrumentId, f64>,
    /// Historical average daily volume of the weekend exchange session.
    pub average_per_day: FnvHashMap<InstrumentId, f64>,
}

#[derive(Debug, Clone)]
pub struct ReferenceClient {
    client: reqwest::Client,
    base: Url,
}

impl ReferenceClient {
    pub fn new(config: &ReferenceConfig) -> Result<Self, FeedError> {
        let mut base = Url::parse(&config.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, base })
    }

    fn url(&self, path: &str) -> Result<Url, FeedError> {
        Ok(self.base.join(path)?)
    }

    fn reference_price_url(&self, id: &InstrumentId, kind: ReferenceKind) -> Result<Url, FeedError> {
        let path = match kind {
            ReferenceKind::SessionClose => "api/price-cache/last-close-price",
            ReferenceKind::EveningClose => "api/price-cache/last-evening-session-price",
        };
        let mut url = self.url(path)?;
        url.query_pairs_mut().append_pair("figi", id.as_str());
        Ok(url)
    }

    fn indices_url(&self, dashboard: Dashboard, action: Option<&str>) -> Result<Url, FeedError> {
        let path = match action {
            Some(action) => format!("api/scanner/{}/indices/{action}", dashboard.slug()),
            None => format!("api/scanner/{}/indices", dashboard.slug()),
        };
        self.url(&path)
    }

    /// GET a body, treating non-2xx as "no data".
    async fn get_optional(&self, url: Url) -> Result<Option<String>, FeedError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "no data");
            return Ok(None);
        }
        Ok(Some(response.text().await?))
    }

    /// GET a body that must exist.
    async fn get_required(&self, url: Url) -> Result<String, FeedError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    pub async fn fetch_derivatives(&self) -> Result<Vec<DerivativeMetadata>, FeedError> {
        let body = self.get_required(self.url("api/scanner/futures")?).await?;
        Ok(FuturesListing::from_json(&body)?.into_metadata())
    }

    pub async fn fetch_reference_price(
        &self,
        id: &InstrumentId,
        kind: ReferenceKind,
    ) -> Result<Option<f64>, FeedError> {
        let body = self.get_optional(self.reference_price_url(id, kind)?).await?;
        Ok(body.as_deref().and_then(parse_scalar))
    }

    /// Today's and historical average volumes, `None` while the backend has no data.
    pub async fn fetch_volumes(&self) -> Result<Option<VolumeSnapshot>, FeedError> {
        self.get_optional(self.url("api/price-cache/volumes")?)
            .await?
            .as_deref()
            .map(parse_volume_snapshot)
            .transpose()
    }

    pub async fn fetch_key_rate(&self) -> Result<Option<f64>, FeedError> {
        let body = self.get_optional(self.url("api/key-rate")?).await?;
        Ok(body.as_deref().and_then(parse_scalar))
    }

    pub async fn list_indices(&self, dashboard: Dashboard) -> Result<Vec<TrackedIndex>, FeedError> {
        let body = self.get_required(self.indices_url(dashboard, None)?).await?;
        parse_index_listing(&body)
    }

    /// Returns `false` if the backend rejected the index (e.g. already present).
    pub async fn add_index(
        &self,
        dashboard: Dashboard,
        name: &str,
        display_name: &str,
    ) -> Result<bool, FeedError> {
        let request = IndexRequest {
            name,
            display_name: Some(display_name),
        };
        let response = self
            .client
            .post(self.indices_url(dashboard, Some("add"))?)
            .json(&request)
            .send()
            .await?;
        Ok(response.json::<IndexAck>().await?.success)
    }

    /// Returns `false` if the backend did not know the index.
    pub async fn remove_index(&self, dashboard: Dashboard, name: &str) -> Result<bool, FeedError> {
        let request = IndexRequest {
            name,
            display_name: None,
        };
        let response = self
            .client
            .delete(self.indices_url(dashboard, Some("remove"))?)
            .json(&request)
            .send()
            .await?;
        Ok(response.json::<IndexAck>().await?.success)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct IndexAck {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct IndexListing {
    #[serde(default)]
    indices: Vec<IndexRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexRecord {
    #[serde(default)]
    figi: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumesResponse {
    #[serde(default)]
    today_volumes: HashMap<String, serde_json::Value>,
    #[serde(default)]
    avg_volumes_per_day: AverageVolumesResponse,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AverageVolumesResponse {
    #[serde(default)]
    weekend_exchange_avg_volumes_per_day: HashMap<String, serde_json::Value>,
}

/// Extract a number from a bare value or a small JSON wrapper object.
pub fn parse_scalar(body: &str) -> Option<f64> {
    let body = body.trim();
    if let Ok(value) = body.parse::<f64>() {
        return Some(value).filter(|value| value.is_finite());
    }
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .as_ref()
        .and_then(scalar_from_value)
}

fn scalar_from_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
        serde_json::Value::Object(object) => SCALAR_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(scalar_from_value)),
        _ => None,
    }
    .filter(|value| value.is_finite())
}

fn parse_volume_snapshot(body: &str) -> Result<VolumeSnapshot, FeedError> {
    let response = serde_json::from_str::<VolumesResponse>(body)?;
    Ok(VolumeSnapshot {
        today: volume_map(response.today_volumes),
        average_per_day: volume_map(
            response
                .avg_volumes_per_day
                .weekend_exchange_avg_volumes_per_day,
        ),
    })
}

fn volume_map(volumes: HashMap<String, serde_json::Value>) -> FnvHashMap<InstrumentId, f64> {
    volumes
        .into_iter()
        .filter_map(|(figi, value)| {
            scalar_from_value(&value)
                .filter(|volume| *volume >= 0.0)
                .map(|volume| (InstrumentId::from(figi), volume))
        })
        .collect()
}

fn parse_index_listing(body: &str) -> Result<Vec<TrackedIndex>, FeedError> {
    let listing = serde_json::from_str::<IndexListing>(body)?;
    Ok(listing
        .indices
        .into_iter()
        .filter_map(|record| {
            let figi = record.figi.filter(|figi| !figi.trim().is_empty())?;
            let display_name = record
                .display_name
                .or(record.name)
                .unwrap_or_else(|| figi.clone());
            Some(TrackedIndex::new(figi, display_name))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalar() {
        struct TestCase {
            input: &'static str,
            expected: Option<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: bare number
                input: "301.55",
                expected: Some(301.55),
            },
            TestCase {
                // TC1: quoted number
                input: r#""16.5""#,
                expected: Some(16.5),
            },
            TestCase {
                // TC2: wrapper object
                input: r#"{"keyRate": 16.5, "date": "2025-10-24"}"#,
                expected: Some(16.5),
            },
            TestCase {
                // TC3: wrapper with string value
                input: r#"{"price": "98.7"}"#,
                expected: Some(98.7),
            },
            TestCase {
                // TC4: empty body
                input: "",
                expected: None,
            },
            TestCase {
                // TC5: unrelated object
                input: r#"{"status": "warming up"}"#,
                expected: None,
            },
            TestCase {
                // TC6: not finite
                input: "NaN",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(parse_scalar(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_volume_snapshot() {
        let body = r#"{
            "todayVolumes": {"F1": 1200, "F2": "350", "F3": null, "F4": -5},
            "morningVolumes": {"F1": 300},
            "avgVolumesPerDay": {
                "morningAvgVolumesPerDay": {"F1": 10},
                "weekendExchangeAvgVolumesPerDay": {"F1": 400.5, "F2": "0"}
            }
        }"#;

        let snapshot = parse_volume_snapshot(body).unwrap();
        assert_eq!(snapshot.today.len(), 2);
        assert_eq!(snapshot.today.get(&InstrumentId::new("F1")), Some(&1200.0));
        assert_eq!(snapshot.today.get(&InstrumentId::new("F2")), Some(&350.0));
        assert_eq!(snapshot.average_per_day.len(), 2);
        assert_eq!(snapshot.average_per_day.get(&InstrumentId::new("F1")), Some(&400.5));

        assert_eq!(parse_volume_snapshot("{}").unwrap(), VolumeSnapshot::default());
        assert!(parse_volume_snapshot("<html>").is_err());
    }

    #[test]
    fn test_parse_index_listing() {
        let body = r#"{
            "success": true,
            "indices": [
                {"figi": "BBG00KDWPPW3", "name": "IMOEX2", "displayName": "IMOEX2"},
                {"figi": "BBG000000001", "name": "RTSI"},
                {"name": "NOFIGI"}
            ]
        }"#;

        let indices = parse_index_listing(body).unwrap();
        assert_eq!(
            indices,
            vec![
                TrackedIndex::new("BBG00KDWPPW3", "IMOEX2"),
                TrackedIndex::new("BBG000000001", "RTSI"),
            ]
        );
    }

    #[test]
    fn test_urls() {
        let client =
            ReferenceClient::new(&ReferenceConfig::new("http://localhost:8085/backend")).unwrap();

        assert_eq!(
            client.url("api/scanner/futures").unwrap().as_str(),
            "http://localhost:8085/backend/api/scanner/futures"
        );
        assert_eq!(
            client
                .reference_price_url(&InstrumentId::new("BBG004730N88"), ReferenceKind::EveningClose)
                .unwrap()
                .as_str(),
            "http://localhost:8085/backend/api/price-cache/last-evening-session-price?figi=BBG004730N88"
        );
        assert_eq!(
            client
                .indices_url(Dashboard::MorningSession, Some("add"))
                .unwrap()
                .as_str(),
            "http://localhost:8085/backend/api/scanner/morning-scanner/indices/add"
        );
        assert!(ReferenceClient::new(&ReferenceConfig::new("not a url")).is_err());
    }
}
