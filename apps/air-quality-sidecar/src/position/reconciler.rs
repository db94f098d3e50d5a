use super::{CommitTrigger, GpsBuffer, StableLocation, TrackStore, COMMIT_DECIMALS};
use crate::reading::{Coordinate, DeviceMode, SensorReading};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Fewest buffered fixes that may be committed on a mobile -> fixed switch.
pub const MIN_TRANSITION_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationOrigin {
    LiveFix,
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayLocation {
    pub coordinate: Coordinate,
    pub origin: LocationOrigin,
}

pub struct PositionReconciler {
    store: Arc<dyn TrackStore>,
    // Buffer and previous mode are updated together under this lock.
    device_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PositionReconciler {
    pub fn new(store: Arc<dyn TrackStore>) -> Self {
        Self {
            store,
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    fn device_lock(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .device_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Feeds one reading through the per-device tracking state and returns
    /// the location committed by this call, if any.
    pub fn on_reading(&self, reading: &SensorReading) -> Option<StableLocation> {
        let device_id = reading.device_id.as_str();
        let lock = self.device_lock(device_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut buffer = self.load_buffer(device_id);
        let before = buffer.clone();
        let mut committed = None;

        if reading.mode == DeviceMode::Mobile {
            match reading.coordinate() {
                Some(Ok(fix)) => {
                    buffer.push(fix);
                    buffer.previous_mode = Some(DeviceMode::Mobile);
                    tracing::debug!(
                        device_id,
                        fix = %fix,
                        buffered = buffer.len(),
                        capacity = GpsBuffer::CAPACITY,
                        "buffered GPS fix"
                    );
                    if buffer.is_full() {
                        committed = stable_from(&buffer, CommitTrigger::Opportunistic);
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        device_id,
                        gps = reading.gps.as_deref().unwrap_or_default(),
                        error = %err,
                        "ignoring malformed GPS fix"
                    );
                }
                None => {}
            }
        }

        if reading.mode == DeviceMode::Fixed {
            if buffer.previous_mode == Some(DeviceMode::Mobile) {
                if buffer.len() >= MIN_TRANSITION_SAMPLES {
                    committed = stable_from(&buffer, CommitTrigger::Transition);
                } else {
                    tracing::debug!(
                        device_id,
                        buffered = buffer.len(),
                        "mode transition with too few fixes; nothing committed"
                    );
                }
                buffer.clear();
            }
            buffer.previous_mode = Some(DeviceMode::Fixed);
        }

        if buffer != before {
            if let Err(err) = self.store.persist_buffer(device_id, &buffer) {
                tracing::warn!(device_id, error = %err, "failed to persist GPS buffer");
            }
        }

        if let Some(location) = committed.as_ref() {
            tracing::info!(
                device_id,
                location = %location.coordinate,
                trigger = ?location.trigger,
                "committed stable location"
            );
            if let Err(err) = self.store.persist_stable_location(device_id, location) {
                tracing::warn!(device_id, error = %err, "failed to persist stable location");
            }
        }

        committed
    }

    pub fn current_stable_location(&self, device_id: &str) -> Option<StableLocation> {
        match self.store.load_stable_location(device_id) {
            Ok(location) => location,
            Err(err) => {
                tracing::warn!(device_id, error = %err, "failed to load stable location");
                None
            }
        }
    }

    /// Where to draw the device: its own well-formed fix, else the last
    /// committed location.
    pub fn display_location(&self, reading: &SensorReading) -> Option<DisplayLocation> {
        if let Some(Ok(coordinate)) = reading.coordinate() {
            return Some(DisplayLocation {
                coordinate,
                origin: LocationOrigin::LiveFix,
            });
        }
        self.current_stable_location(&reading.device_id)
            .map(|location| DisplayLocation {
                coordinate: location.coordinate,
                origin: LocationOrigin::Committed,
            })
    }

    pub fn buffer(&self, device_id: &str) -> GpsBuffer {
        let lock = self.device_lock(device_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_buffer(device_id)
    }

    fn load_buffer(&self, device_id: &str) -> GpsBuffer {
        match self.store.load_buffer(device_id) {
            Ok(buffer) => buffer.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(device_id, error = %err, "failed to load GPS buffer; starting fresh");
                GpsBuffer::default()
            }
        }
    }
}

fn stable_from(buffer: &GpsBuffer, trigger: CommitTrigger) -> Option<StableLocation> {
    buffer.mean().map(|mean| StableLocation {
        coordinate: mean.rounded(COMMIT_DECIMALS),
        committed_at: Utc::now(),
        trigger,
    })
}
