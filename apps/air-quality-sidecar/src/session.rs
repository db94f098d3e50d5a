use crate::aqi::{AggregatePolicy, AqiResolver, AqiResult};
use crate::error::SourceError;
use crate::history::{pollutant_statuses, PollutantStatus};
use crate::position::{DisplayLocation, PositionReconciler, StableLocation, TrackStore};
use crate::reading::{Pollutant, SensorReading};
use crate::source::{DataSource, DeviceDirectory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Everything the dashboard shows for one device after its latest reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub reading: SensorReading,
    pub aqi: AqiResult,
    pub location: Option<DisplayLocation>,
    /// Set only when this reading committed a new stable location.
    pub committed: Option<StableLocation>,
    pub statuses: BTreeMap<Pollutant, PollutantStatus>,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiStatus {
    pub online: bool,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub policy: AggregatePolicy,
    pub aggregate_timeout: Duration,
    pub history_limit: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            policy: AggregatePolicy::default(),
            aggregate_timeout: Duration::from_secs(3),
            history_limit: 100,
        }
    }
}

/// Per-process dashboard state shared by the poller and the HTTP surface.
pub struct DashboardSession {
    source: Arc<dyn DataSource>,
    resolver: AqiResolver,
    reconciler: Arc<PositionReconciler>,
    history_limit: u32,
    snapshots: RwLock<HashMap<String, DeviceSnapshot>>,
    status: RwLock<ApiStatus>,
}

impl DashboardSession {
    pub fn new(source: Arc<dyn DataSource>, store: Arc<dyn TrackStore>, options: SessionOptions) -> Self {
        Self {
            resolver: AqiResolver::new(source.clone(), options.policy, options.aggregate_timeout),
            reconciler: Arc::new(PositionReconciler::new(store)),
            source,
            history_limit: options.history_limit,
            snapshots: RwLock::new(HashMap::new()),
            status: RwLock::new(ApiStatus::default()),
        }
    }

    pub async fn resolve_aqi(&self, reading: &SensorReading) -> AqiResult {
        self.resolver.resolve(reading).await
    }

    pub fn reconcile_position(&self, reading: &SensorReading) -> Option<StableLocation> {
        self.reconciler.on_reading(reading)
    }

    pub fn current_stable_location(&self, device_id: &str) -> Option<StableLocation> {
        self.reconciler.current_stable_location(device_id)
    }

    /// Runs a reading through position tracking and AQI resolution and
    /// caches the result. Position is reconciled first so the snapshot's
    /// display location reflects any commit made by this reading.
    pub async fn process_reading(&self, reading: SensorReading) -> DeviceSnapshot {
        let (committed, location) = self.track_position(&reading).await;
        let aqi = self.resolve_aqi(&reading).await;
        let snapshot = DeviceSnapshot {
            location,
            statuses: pollutant_statuses(&reading.pollutants),
            committed,
            aqi,
            reading,
            refreshed_at: Utc::now(),
        };
        tracing::debug!(
            device_id = %snapshot.reading.device_id,
            aqi = snapshot.aqi.value,
            source = ?snapshot.aqi.source,
            dominant = %snapshot.aqi.dominant_pollutant,
            "device snapshot updated"
        );
        self.snapshots
            .write()
            .await
            .insert(snapshot.reading.device_id.clone(), snapshot.clone());
        snapshot
    }

    /// The track store does blocking file IO, so reconciliation runs on the
    /// blocking pool.
    async fn track_position(
        &self,
        reading: &SensorReading,
    ) -> (Option<StableLocation>, Option<DisplayLocation>) {
        let reconciler = self.reconciler.clone();
        let tracked = reading.clone();
        let work = tokio::task::spawn_blocking(move || {
            let committed = reconciler.on_reading(&tracked);
            (committed, reconciler.display_location(&tracked))
        });
        match work.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(device_id = %reading.device_id, error = %err, "position tracking task failed");
                (None, None)
            }
        }
    }

    /// Pulls the device's latest reading from upstream and processes it.
    pub async fn refresh(&self, device_id: &str) -> Result<DeviceSnapshot, SourceError> {
        let reading = self.track(self.source.fetch_latest_reading(device_id).await).await?;
        Ok(self.process_reading(reading).await)
    }

    pub async fn snapshot(&self, device_id: &str) -> Option<DeviceSnapshot> {
        self.snapshots.read().await.get(device_id).cloned()
    }

    pub async fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut all: Vec<DeviceSnapshot> = self.snapshots.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.reading.device_id.cmp(&b.reading.device_id));
        all
    }

    pub async fn devices(&self) -> Result<DeviceDirectory, SourceError> {
        self.track(self.source.fetch_devices().await).await
    }

    pub async fn history(&self, device_id: &str, hours: u32) -> Result<Vec<SensorReading>, SourceError> {
        let result = self
            .source
            .fetch_history(device_id, hours, self.history_limit)
            .await;
        self.track(result).await
    }

    pub async fn api_status(&self) -> ApiStatus {
        self.status.read().await.clone()
    }

    async fn track<T>(&self, result: Result<T, SourceError>) -> Result<T, SourceError> {
        let mut status = self.status.write().await;
        match &result {
            Ok(_) => {
                if !status.online {
                    tracing::info!("upstream sensor API online");
                }
                status.online = true;
                status.last_error = None;
                status.last_success = Some(Utc::now());
            }
            Err(err) => {
                if status.online {
                    tracing::warn!(error = %err, "upstream sensor API offline");
                }
                status.online = false;
                status.last_error = Some(err.to_string());
                status.last_failure = Some(Utc::now());
            }
        }
        result
    }
}
