//! Derived views over reading history: per-pollutant status badges,
//! gap-aware chart series and mobile route summaries.

use crate::reading::{Coordinate, Pollutant, PollutantLevels, SensorReading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Consecutive readings further apart than this break a series.
pub const GAP_SECONDS: i64 = 300;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Pm25,
    Pm10,
    O3,
    Co,
    Temperature,
    Humidity,
    Noise,
    Battery,
}

impl Metric {
    pub fn value(self, reading: &SensorReading) -> Option<f64> {
        match self.pollutant() {
            Some(pollutant) => reading.pollutants.get(pollutant),
            None => match self {
                Self::Temperature => reading.temperature,
                Self::Humidity => reading.humidity,
                Self::Noise => reading.noise,
                Self::Battery => reading.battery,
                _ => None,
            },
        }
    }

    pub fn pollutant(self) -> Option<Pollutant> {
        match self {
            Self::Pm25 => Some(Pollutant::Pm25),
            Self::Pm10 => Some(Pollutant::Pm10),
            Self::O3 => Some(Pollutant::O3),
            Self::Co => Some(Pollutant::Co),
            _ => None,
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Ok(pollutant) = raw.parse::<Pollutant>() {
            return Ok(match pollutant {
                Pollutant::Pm25 => Self::Pm25,
                Pollutant::Pm10 => Self::Pm10,
                Pollutant::O3 => Self::O3,
                Pollutant::Co => Self::Co,
            });
        }
        match raw.trim().to_ascii_lowercase().as_str() {
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            "noise" => Ok(Self::Noise),
            "battery" => Ok(Self::Battery),
            _ => Err(format!("unknown metric {raw:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollutantStatus {
    Good,
    Moderate,
    Unhealthy,
}

/// Inclusive upper bounds for the Good and Moderate badges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusThresholds {
    pub good: f64,
    pub moderate: f64,
}

pub fn thresholds(pollutant: Pollutant) -> StatusThresholds {
    let (good, moderate) = match pollutant {
        Pollutant::Pm25 => (12.0, 35.4),
        Pollutant::Pm10 => (54.0, 154.0),
        Pollutant::O3 => (54.0, 70.0),
        Pollutant::Co => (4400.0, 9400.0),
    };
    StatusThresholds { good, moderate }
}

pub fn pollutant_status(pollutant: Pollutant, value: f64) -> PollutantStatus {
    let limits = thresholds(pollutant);
    if value <= limits.good {
        PollutantStatus::Good
    } else if value <= limits.moderate {
        PollutantStatus::Moderate
    } else {
        PollutantStatus::Unhealthy
    }
}

/// Badges for every pollutant present in `levels`.
pub fn pollutant_statuses(levels: &PollutantLevels) -> BTreeMap<Pollutant, PollutantStatus> {
    Pollutant::ALL
        .into_iter()
        .filter_map(|p| levels.get(p).map(|v| (p, pollutant_status(p, v))))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

fn ascending(records: &[SensorReading]) -> Vec<&SensorReading> {
    let mut sorted: Vec<&SensorReading> = records.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);
    sorted
}

/// Oldest-first series for `metric`. The first point after a gap longer
/// than [`GAP_SECONDS`] carries no value so charts do not bridge the gap.
pub fn series(records: &[SensorReading], metric: Metric) -> Vec<SeriesPoint> {
    let sorted = ascending(records);
    let mut out = Vec::with_capacity(sorted.len());
    let mut previous: Option<DateTime<Utc>> = None;
    for reading in sorted {
        let gap = previous
            .map(|prev| (reading.timestamp - prev).num_seconds() > GAP_SECONDS)
            .unwrap_or(false);
        out.push(SeriesPoint {
            timestamp: reading.timestamp,
            value: if gap { None } else { metric.value(reading) },
        });
        previous = Some(reading.timestamp);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutePoint {
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    pub metric: Metric,
    pub points: Vec<RoutePoint>,
    pub distance_km: f64,
    pub average: Option<f64>,
    pub peak: Option<f64>,
    pub hotspots: Vec<RoutePoint>,
}

/// Great-circle distance in metres.
pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Route travelled by a device over `records`, or `None` with fewer than
/// two well-formed fixes.
pub fn route_summary(records: &[SensorReading], metric: Metric) -> Option<RouteSummary> {
    let points: Vec<RoutePoint> = ascending(records)
        .into_iter()
        .filter_map(|reading| {
            let coordinate = reading.coordinate()?.ok()?;
            Some(RoutePoint {
                coordinate,
                timestamp: reading.timestamp,
                value: metric.value(reading),
            })
        })
        .collect();
    if points.len() < 2 {
        return None;
    }

    let distance_m: f64 = points
        .windows(2)
        .map(|pair| haversine_m(pair[0].coordinate, pair[1].coordinate))
        .sum();

    let values: Vec<f64> = points.iter().filter_map(|p| p.value).collect();
    let average = if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    };
    let peak = values.iter().copied().reduce(f64::max);

    let hotspots = match metric.pollutant() {
        Some(pollutant) => points
            .iter()
            .filter(|p| {
                p.value
                    .map(|v| pollutant_status(pollutant, v) == PollutantStatus::Unhealthy)
                    .unwrap_or(false)
            })
            .copied()
            .collect(),
        None => Vec::new(),
    };

    Some(RouteSummary {
        metric,
        points,
        distance_km: distance_m / 1000.0,
        average,
        peak,
        hotspots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mobile_reading, ts, BASE_TS};

    fn at(secs: i64, gps: &str, pm25: Option<f64>) -> SensorReading {
        let mut reading = mobile_reading("SMAA_002", gps);
        reading.timestamp = ts(BASE_TS + secs);
        reading.pollutants.pm25 = pm25;
        reading
    }

    #[test]
    fn status_badges_use_inclusive_thresholds() {
        assert_eq!(pollutant_status(Pollutant::Pm25, 12.0), PollutantStatus::Good);
        assert_eq!(pollutant_status(Pollutant::Pm25, 35.4), PollutantStatus::Moderate);
        assert_eq!(pollutant_status(Pollutant::Pm25, 35.5), PollutantStatus::Unhealthy);
        assert_eq!(pollutant_status(Pollutant::Co, 9400.0), PollutantStatus::Moderate);
    }

    #[test]
    fn statuses_skip_absent_pollutants() {
        let levels = PollutantLevels {
            pm25: Some(5.0),
            pm10: None,
            o3: Some(80.0),
            co: None,
        };
        let statuses = pollutant_statuses(&levels);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[&Pollutant::Pm25], PollutantStatus::Good);
        assert_eq!(statuses[&Pollutant::O3], PollutantStatus::Unhealthy);
    }

    #[test]
    fn series_is_ascending_and_breaks_on_gaps() {
        let records = vec![
            at(900, "0,0", Some(3.0)),
            at(0, "0,0", Some(1.0)),
            at(60, "0,0", Some(2.0)),
            at(1000, "0,0", None),
        ];
        let points = series(&records, Metric::Pm25);
        let values: Vec<Option<f64>> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Some(1.0), Some(2.0), None, None]);
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn haversine_one_degree_of_longitude_at_equator() {
        let d = haversine_m(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((d - 111_194.93).abs() < 1.0, "got {d}");
    }

    #[test]
    fn route_summary_needs_two_fixes() {
        let records = vec![at(0, "0,0", Some(1.0)), at(60, "bogus", Some(2.0))];
        assert!(route_summary(&records, Metric::Pm25).is_none());
    }

    #[test]
    fn route_summary_reports_distance_exposure_and_hotspots() {
        let records = vec![
            at(0, "0,0", Some(10.0)),
            at(60, "0,1", Some(40.0)),
            at(120, "0,2", None),
            at(180, "oops", Some(500.0)),
        ];
        let summary = route_summary(&records, Metric::Pm25).unwrap();
        assert_eq!(summary.points.len(), 3);
        assert!((summary.distance_km - 222.39).abs() < 0.01, "got {}", summary.distance_km);
        assert_eq!(summary.average, Some(25.0));
        assert_eq!(summary.peak, Some(40.0));
        assert_eq!(summary.hotspots.len(), 1);
        assert_eq!(summary.hotspots[0].coordinate, Coordinate::new(0.0, 1.0));
    }

    #[test]
    fn non_pollutant_routes_have_no_hotspots() {
        let records = vec![at(0, "0,0", Some(90.0)), at(60, "0,1", Some(90.0))];
        let summary = route_summary(&records, Metric::Temperature).unwrap();
        assert!(summary.hotspots.is_empty());
        assert_eq!(summary.peak, Some(21.5));
    }

    #[test]
    fn metric_names_parse() {
        assert_eq!("PM2.5".parse::<Metric>(), Ok(Metric::Pm25));
        assert_eq!("noise".parse::<Metric>(), Ok(Metric::Noise));
        assert!("wind".parse::<Metric>().is_err());
    }
}
