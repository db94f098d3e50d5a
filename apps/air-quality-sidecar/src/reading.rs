//! Sensor readings and hourly rollups as delivered by the upstream API.
//!
//! Upstream fields are loosely typed: a concentration may arrive as a number,
//! a numeric string, `null`, an empty string, or not at all. Every numeric
//! field goes through [`lenient_f64`], which maps anything that is not a
//! finite number to `None`. Nothing here substitutes zero for a missing
//! value; the AQI layer owns that policy.

use crate::aqi::AqiCategory;
use crate::error::{CoordinateError, SourceError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    Fixed,
    Mobile,
}

impl DeviceMode {
    /// Upstream encodes mobile as `1`; anything else reports as fixed.
    fn from_wire(value: &JsonValue) -> Self {
        let mobile = match value {
            JsonValue::Number(n) => n.as_f64() == Some(1.0),
            JsonValue::String(s) => {
                let s = s.trim();
                s == "1" || s.eq_ignore_ascii_case("mobile")
            }
            JsonValue::Bool(b) => *b,
            _ => false,
        };
        if mobile {
            Self::Mobile
        } else {
            Self::Fixed
        }
    }
}

/// Pollutants that feed the AQI, in tie-breaking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pollutant {
    Pm25,
    Pm10,
    O3,
    Co,
}

impl Pollutant {
    pub const ALL: [Pollutant; 4] = [Pollutant::Pm25, Pollutant::Pm10, Pollutant::O3, Pollutant::Co];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pm25 => "pm25",
            Self::Pm10 => "pm10",
            Self::O3 => "o3",
            Self::Co => "co",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pollutant {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "pm25" => Ok(Self::Pm25),
            "pm10" => Ok(Self::Pm10),
            "o3" | "ozone" => Ok(Self::O3),
            "co" => Ok(Self::Co),
            _ => Err(format!("unknown pollutant {raw:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PollutantLevels {
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub co: Option<f64>,
}

impl PollutantLevels {
    /// Concentration for `pollutant`, or `None` when absent, negative or not finite.
    pub fn get(&self, pollutant: Pollutant) -> Option<f64> {
        let raw = match pollutant {
            Pollutant::Pm25 => self.pm25,
            Pollutant::Pm10 => self.pm10,
            Pollutant::O3 => self.o3,
            Pollutant::Co => self.co,
        };
        raw.filter(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Parses the upstream `"lat,lon"` form.
    pub fn parse(raw: &str) -> Result<Self, CoordinateError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoordinateError::Empty);
        }
        let parts: Vec<&str> = trimmed.split(',').collect();
        if parts.len() != 2 {
            return Err(CoordinateError::FieldCount(parts.len()));
        }
        let parse_part = |part: &str| {
            part.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| CoordinateError::NotANumber(part.trim().to_string()))
        };
        let lat = parse_part(parts[0])?;
        let lon = parse_part(parts[1])?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::OutOfRange { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Arithmetic mean of latitude and longitude, independently.
    pub fn mean<'a>(points: impl IntoIterator<Item = &'a Coordinate>) -> Option<Self> {
        let mut count = 0usize;
        let (mut lat, mut lon) = (0.0, 0.0);
        for point in points {
            lat += point.lat;
            lon += point.lon;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            lat: lat / count as f64,
            lon: lon / count as f64,
        })
    }

    pub fn rounded(self, decimals: i32) -> Self {
        let scale = 10f64.powi(decimals);
        Self {
            lat: (self.lat * scale).round() / scale,
            lon: (self.lon * scale).round() / scale,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub mode: DeviceMode,
    pub pollutants: PollutantLevels,
    pub gps: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub noise: Option<f64>,
    pub battery: Option<f64>,
}

impl SensorReading {
    /// The parsed GPS fix. `None` when the reading carries no fix at all.
    pub fn coordinate(&self) -> Option<Result<Coordinate, CoordinateError>> {
        let raw = self.gps.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(Coordinate::parse(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyAggregate {
    pub hour_start: DateTime<Utc>,
    pub pollutant_averages: PollutantLevels,
    pub data_completeness_pct: f64,
    pub quality_score: f64,
    pub aqi: u16,
    pub aqi_category: AqiCategory,
    pub aqi_pollutant: Pollutant,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireReading {
    #[serde(default, rename = "deviceID", alias = "device_id", deserialize_with = "lenient_string")]
    device_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    timestamp: Option<f64>,
    #[serde(default)]
    mode: JsonValue,
    #[serde(default, deserialize_with = "lenient_f64")]
    pm25: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pm10: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    o3: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    co: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    gps: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    noise: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    battery: Option<f64>,
}

impl WireReading {
    /// Attributes a payload that omits its device id to the device it was
    /// requested for.
    pub(crate) fn for_device(mut self, device_id: &str) -> Self {
        if self.device_id.is_none() {
            self.device_id = Some(device_id.to_string());
        }
        self
    }
}

impl TryFrom<WireReading> for SensorReading {
    type Error = SourceError;

    fn try_from(wire: WireReading) -> Result<Self, Self::Error> {
        let device_id = wire
            .device_id
            .ok_or_else(|| SourceError::Decode("reading has no deviceID".to_string()))?;
        let timestamp = wire
            .timestamp
            .and_then(|secs| unix_seconds(secs as i64))
            .ok_or_else(|| {
                SourceError::Decode(format!("reading for {device_id} has no valid timestamp"))
            })?;
        Ok(Self {
            timestamp,
            mode: DeviceMode::from_wire(&wire.mode),
            pollutants: PollutantLevels {
                pm25: wire.pm25,
                pm10: wire.pm10,
                o3: wire.o3,
                co: wire.co,
            },
            gps: wire.gps,
            temperature: wire.temperature,
            humidity: wire.humidity,
            noise: wire.noise,
            battery: wire.battery,
            device_id,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireAggregate {
    #[serde(default, deserialize_with = "lenient_f64")]
    hour_start: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pm25: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pm10: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    o3: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    co: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    data_completeness_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    quality_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    aqi: Option<f64>,
    #[serde(default)]
    aqi_category: Option<String>,
    #[serde(default)]
    aqi_pollutant: Option<String>,
}

impl TryFrom<WireAggregate> for HourlyAggregate {
    type Error = SourceError;

    fn try_from(wire: WireAggregate) -> Result<Self, Self::Error> {
        let missing = |field: &str| SourceError::Decode(format!("hourly aggregate missing {field}"));
        let hour_start = wire
            .hour_start
            .and_then(|secs| unix_seconds(secs as i64))
            .ok_or_else(|| missing("hour_start"))?;
        let aqi = wire.aqi.filter(|v| *v >= 0.0).ok_or_else(|| missing("aqi"))?;
        let aqi_category = wire
            .aqi_category
            .as_deref()
            .ok_or_else(|| missing("aqi_category"))?
            .parse::<AqiCategory>()
            .map_err(SourceError::Decode)?;
        let aqi_pollutant = wire
            .aqi_pollutant
            .as_deref()
            .ok_or_else(|| missing("aqi_pollutant"))?
            .parse::<Pollutant>()
            .map_err(SourceError::Decode)?;
        Ok(Self {
            hour_start,
            pollutant_averages: PollutantLevels {
                pm25: wire.pm25,
                pm10: wire.pm10,
                o3: wire.o3,
                co: wire.co,
            },
            data_completeness_pct: wire.data_completeness_pct.unwrap_or(0.0),
            quality_score: wire.quality_score.unwrap_or(0.0),
            aqi: aqi.round().min(f64::from(u16::MAX)) as u16,
            aqi_category,
            aqi_pollutant,
        })
    }
}

pub(crate) fn unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Accepts numbers and numeric strings; everything else decodes to `None`.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

/// Non-empty trimmed strings; numbers, booleans and blanks decode to `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        _ => None,
    })
}
