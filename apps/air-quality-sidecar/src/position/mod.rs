//! GPS position reconciliation.
//!
//! A mobile device reports jittery fixes. The reconciler keeps the five most
//! recent fixes per device and commits their mean as the device's stable
//! location either when the window fills or when the device switches from
//! mobile to fixed mode.

mod reconciler;
mod store;

pub use reconciler::{DisplayLocation, LocationOrigin, PositionReconciler, MIN_TRANSITION_SAMPLES};
pub use store::{FileTrackStore, MemoryTrackStore, TrackStore};

use crate::reading::{Coordinate, DeviceMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Decimal places kept on a committed location.
pub const COMMIT_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsBuffer {
    pub samples: VecDeque<Coordinate>,
    #[serde(default)]
    pub previous_mode: Option<DeviceMode>,
}

impl GpsBuffer {
    pub const CAPACITY: usize = 5;

    /// Appends a fix, evicting the oldest once past capacity.
    pub fn push(&mut self, fix: Coordinate) {
        self.samples.push_back(fix);
        while self.samples.len() > Self::CAPACITY {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == Self::CAPACITY
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn mean(&self) -> Option<Coordinate> {
        Coordinate::mean(&self.samples)
    }

    pub fn state(&self) -> TrackingState {
        match (self.previous_mode, self.samples.len()) {
            (Some(DeviceMode::Mobile), n) if n >= Self::CAPACITY => TrackingState::Full,
            (Some(DeviceMode::Mobile), n) if n > 0 => TrackingState::Accumulating,
            _ => TrackingState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Idle,
    Accumulating,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitTrigger {
    /// The sliding window reached capacity while still mobile.
    Opportunistic,
    /// The device switched from mobile to fixed.
    Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StableLocation {
    pub coordinate: Coordinate,
    pub committed_at: DateTime<Utc>,
    pub trigger: CommitTrigger,
}
