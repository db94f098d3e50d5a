use crate::error::SourceError;
use crate::reading::{HourlyAggregate, SensorReading, WireAggregate, WireReading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Read side of the upstream sensor API. One attempt per call; no retries.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_latest_reading(&self, device_id: &str) -> Result<SensorReading, SourceError>;

    /// Rollup for the hour starting at `covering_hour`, if upstream has one.
    async fn fetch_hourly_aggregate(
        &self,
        device_id: &str,
        covering_hour: DateTime<Utc>,
    ) -> Result<Option<HourlyAggregate>, SourceError>;

    async fn fetch_history(
        &self,
        device_id: &str,
        hours: u32,
        limit: u32,
    ) -> Result<Vec<SensorReading>, SourceError>;

    async fn fetch_devices(&self) -> Result<DeviceDirectory, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "deviceID", alias = "device_id")]
    pub device_id: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDirectory {
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub online_count: u32,
    #[serde(default)]
    pub offline_count: u32,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_base: &str, request_timeout: Duration) -> Result<Self, SourceError> {
        let base = Url::parse(api_base)?;
        let http = Client::builder()
            .user_agent(concat!("air-quality-sidecar/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http, base })
    }

    fn url(&self, params: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        tracing::debug!(url = %url, "upstream request");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl DataSource for ApiClient {
    async fn fetch_latest_reading(&self, device_id: &str) -> Result<SensorReading, SourceError> {
        let url = self.url(&[
            ("deviceID", device_id.to_string()),
            ("action", "latest".to_string()),
        ]);
        let envelope: DataEnvelope<WireReading> = self.get_json(url).await?;
        let wire = envelope
            .data
            .ok_or_else(|| SourceError::Decode(format!("no latest reading for {device_id}")))?;
        SensorReading::try_from(wire.for_device(device_id))
    }

    async fn fetch_hourly_aggregate(
        &self,
        device_id: &str,
        covering_hour: DateTime<Utc>,
    ) -> Result<Option<HourlyAggregate>, SourceError> {
        let url = self.url(&[
            ("deviceID", device_id.to_string()),
            ("action", "hourly".to_string()),
            ("hour", covering_hour.timestamp().to_string()),
        ]);
        let envelope: DataEnvelope<WireAggregate> = self.get_json(url).await?;
        envelope.data.map(HourlyAggregate::try_from).transpose()
    }

    async fn fetch_history(
        &self,
        device_id: &str,
        hours: u32,
        limit: u32,
    ) -> Result<Vec<SensorReading>, SourceError> {
        let url = self.url(&[
            ("deviceID", device_id.to_string()),
            ("action", "history".to_string()),
            ("hours", hours.to_string()),
            ("limit", limit.to_string()),
        ]);
        let envelope: DataEnvelope<Vec<WireReading>> = self.get_json(url).await?;
        let mut readings = Vec::new();
        for wire in envelope.data.unwrap_or_default() {
            match SensorReading::try_from(wire.for_device(device_id)) {
                Ok(reading) => readings.push(reading),
                Err(err) => tracing::debug!(device_id, error = %err, "skipping undecodable history row"),
            }
        }
        Ok(readings)
    }

    async fn fetch_devices(&self) -> Result<DeviceDirectory, SourceError> {
        let url = self.url(&[("action", "devices".to_string())]);
        self.get_json(url).await
    }
}
