use super::{GpsBuffer, StableLocation};
use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable per-device key-value storage for tracking state.
pub trait TrackStore: Send + Sync {
    fn load_buffer(&self, device_id: &str) -> Result<Option<GpsBuffer>, StoreError>;
    fn persist_buffer(&self, device_id: &str, buffer: &GpsBuffer) -> Result<(), StoreError>;
    fn load_stable_location(&self, device_id: &str) -> Result<Option<StableLocation>, StoreError>;
    fn persist_stable_location(
        &self,
        device_id: &str,
        location: &StableLocation,
    ) -> Result<(), StoreError>;
}

/// One JSON document per device and record kind, replaced atomically
/// through a temp file + rename.
#[derive(Debug, Clone)]
pub struct FileTrackStore {
    dir: PathBuf,
}

impl FileTrackStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn record_path(&self, device_id: &str, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.{kind}.json", file_key(device_id)))
    }

    fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let parsed = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(parsed))
    }

    fn write<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.display().to_string(),
            source,
        };
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

impl TrackStore for FileTrackStore {
    fn load_buffer(&self, device_id: &str) -> Result<Option<GpsBuffer>, StoreError> {
        Self::read(&self.record_path(device_id, "gps_buffer"))
    }

    fn persist_buffer(&self, device_id: &str, buffer: &GpsBuffer) -> Result<(), StoreError> {
        Self::write(&self.record_path(device_id, "gps_buffer"), buffer)
    }

    fn load_stable_location(&self, device_id: &str) -> Result<Option<StableLocation>, StoreError> {
        Self::read(&self.record_path(device_id, "fixed_gps"))
    }

    fn persist_stable_location(
        &self,
        device_id: &str,
        location: &StableLocation,
    ) -> Result<(), StoreError> {
        Self::write(&self.record_path(device_id, "fixed_gps"), location)
    }
}

/// Device ids come from upstream; keep file names to a safe alphabet.
fn file_key(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryTrackStore {
    buffers: Mutex<HashMap<String, GpsBuffer>>,
    locations: Mutex<HashMap<String, StableLocation>>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackStore for MemoryTrackStore {
    fn load_buffer(&self, device_id: &str) -> Result<Option<GpsBuffer>, StoreError> {
        let buffers = self.buffers.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(buffers.get(device_id).cloned())
    }

    fn persist_buffer(&self, device_id: &str, buffer: &GpsBuffer) -> Result<(), StoreError> {
        let mut buffers = self.buffers.lock().map_err(|_| StoreError::Poisoned)?;
        buffers.insert(device_id.to_string(), buffer.clone());
        Ok(())
    }

    fn load_stable_location(&self, device_id: &str) -> Result<Option<StableLocation>, StoreError> {
        let locations = self.locations.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(locations.get(device_id).copied())
    }

    fn persist_stable_location(
        &self,
        device_id: &str,
        location: &StableLocation,
    ) -> Result<(), StoreError> {
        let mut locations = self.locations.lock().map_err(|_| StoreError::Poisoned)?;
        locations.insert(device_id.to_string(), *location);
        Ok(())
    }
}
