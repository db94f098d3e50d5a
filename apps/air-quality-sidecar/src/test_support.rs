use crate::aqi::AqiCategory;
use crate::error::SourceError;
use crate::reading::{DeviceMode, HourlyAggregate, Pollutant, PollutantLevels, SensorReading};
use crate::source::{DataSource, DeviceDirectory, DeviceInfo};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const BASE_TS: i64 = 1_700_000_000;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

pub fn fixed_reading(device_id: &str) -> SensorReading {
    SensorReading {
        device_id: device_id.to_string(),
        timestamp: ts(BASE_TS),
        mode: DeviceMode::Fixed,
        pollutants: PollutantLevels {
            pm25: Some(41.0),
            pm10: Some(100.0),
            o3: Some(60.0),
            co: Some(5000.0),
        },
        gps: None,
        temperature: Some(21.5),
        humidity: Some(48.0),
        noise: Some(55.0),
        battery: Some(90.0),
    }
}

pub fn mobile_reading(device_id: &str, gps: &str) -> SensorReading {
    SensorReading {
        mode: DeviceMode::Mobile,
        gps: Some(gps.to_string()),
        ..fixed_reading(device_id)
    }
}

pub fn aggregate(quality_score: f64, data_completeness_pct: f64, aqi: u16) -> HourlyAggregate {
    HourlyAggregate {
        hour_start: ts(BASE_TS - BASE_TS % 3600),
        pollutant_averages: PollutantLevels::default(),
        data_completeness_pct,
        quality_score,
        aqi,
        aqi_category: AqiCategory::from_index(aqi),
        aqi_pollutant: Pollutant::Pm10,
    }
}

#[derive(Debug, Clone)]
pub enum AggregateScript {
    Missing,
    Present(HourlyAggregate),
    Fail,
    Hang,
}

/// In-memory upstream that records how often each call was made.
pub struct ScriptedSource {
    latest: Mutex<HashMap<String, SensorReading>>,
    aggregate: Mutex<AggregateScript>,
    history: Mutex<Vec<SensorReading>>,
    devices: Mutex<Option<DeviceDirectory>>,
    aggregate_calls: AtomicUsize,
    last_aggregate_hour: Mutex<Option<DateTime<Utc>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(HashMap::new()),
            aggregate: Mutex::new(AggregateScript::Missing),
            history: Mutex::new(Vec::new()),
            devices: Mutex::new(None),
            aggregate_calls: AtomicUsize::new(0),
            last_aggregate_hour: Mutex::new(None),
        }
    }

    pub fn set_latest(&self, reading: SensorReading) {
        self.latest
            .lock()
            .unwrap()
            .insert(reading.device_id.clone(), reading);
    }

    pub fn set_aggregate(&self, script: AggregateScript) {
        *self.aggregate.lock().unwrap() = script;
    }

    pub fn set_history(&self, rows: Vec<SensorReading>) {
        *self.history.lock().unwrap() = rows;
    }

    pub fn set_devices(&self, ids: &[&str]) {
        let devices: Vec<DeviceInfo> = ids
            .iter()
            .map(|id| DeviceInfo {
                device_id: id.to_string(),
                online: true,
                last_seen: None,
            })
            .collect();
        let count = devices.len() as u32;
        *self.devices.lock().unwrap() = Some(DeviceDirectory {
            devices,
            count,
            online_count: count,
            offline_count: 0,
        });
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn last_aggregate_hour(&self) -> Option<DateTime<Utc>> {
        *self.last_aggregate_hour.lock().unwrap()
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch_latest_reading(&self, device_id: &str) -> Result<SensorReading, SourceError> {
        self.latest
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or(SourceError::Status { status: 404 })
    }

    async fn fetch_hourly_aggregate(
        &self,
        _device_id: &str,
        covering_hour: DateTime<Utc>,
    ) -> Result<Option<HourlyAggregate>, SourceError> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_aggregate_hour.lock().unwrap() = Some(covering_hour);
        let script = self.aggregate.lock().unwrap().clone();
        match script {
            AggregateScript::Missing => Ok(None),
            AggregateScript::Present(aggregate) => Ok(Some(aggregate)),
            AggregateScript::Fail => Err(SourceError::Decode("scripted failure".to_string())),
            AggregateScript::Hang => {
                futures::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn fetch_history(
        &self,
        device_id: &str,
        _hours: u32,
        limit: u32,
    ) -> Result<Vec<SensorReading>, SourceError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.device_id == device_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_devices(&self) -> Result<DeviceDirectory, SourceError> {
        self.devices
            .lock()
            .unwrap()
            .clone()
            .ok_or(SourceError::Status { status: 503 })
    }
}
