use super::{AqiCategory, AqiResult, AqiSource};
use crate::reading::{Pollutant, PollutantLevels};

/// Index reported for any concentration above the last table row.
pub const AQI_CEILING: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub c_low: f64,
    pub c_high: f64,
    pub i_low: u16,
    pub i_high: u16,
}

const fn bp(c_low: f64, c_high: f64, i_low: u16, i_high: u16) -> Breakpoint {
    Breakpoint {
        c_low,
        c_high,
        i_low,
        i_high,
    }
}

// µg/m³, 24-hour
const PM25: [Breakpoint; 6] = [
    bp(0.0, 12.0, 0, 50),
    bp(12.1, 35.4, 51, 100),
    bp(35.5, 55.4, 101, 150),
    bp(55.5, 150.4, 151, 200),
    bp(150.5, 250.4, 201, 300),
    bp(250.5, 500.4, 301, 500),
];

// µg/m³, 24-hour
const PM10: [Breakpoint; 6] = [
    bp(0.0, 54.0, 0, 50),
    bp(55.0, 154.0, 51, 100),
    bp(155.0, 254.0, 101, 150),
    bp(255.0, 354.0, 151, 200),
    bp(355.0, 424.0, 201, 300),
    bp(425.0, 604.0, 301, 500),
];

// ppb, 8-hour. The 8-hour table stops at 200 ppb.
const O3: [Breakpoint; 5] = [
    bp(0.0, 54.0, 0, 50),
    bp(55.0, 70.0, 51, 100),
    bp(71.0, 85.0, 101, 150),
    bp(86.0, 105.0, 151, 200),
    bp(106.0, 200.0, 201, 300),
];

// ppb, 8-hour
const CO: [Breakpoint; 6] = [
    bp(0.0, 4400.0, 0, 50),
    bp(4500.0, 9400.0, 51, 100),
    bp(9500.0, 12400.0, 101, 150),
    bp(12500.0, 15400.0, 151, 200),
    bp(15500.0, 30400.0, 201, 300),
    bp(30500.0, 50400.0, 301, 500),
];

pub fn table(pollutant: Pollutant) -> &'static [Breakpoint] {
    match pollutant {
        Pollutant::Pm25 => &PM25,
        Pollutant::Pm10 => &PM10,
        Pollutant::O3 => &O3,
        Pollutant::Co => &CO,
    }
}

/// Piecewise-linear interpolation over an ascending table.
///
/// Values in the reporting-precision gap between two rows (e.g. PM2.5 12.05)
/// are pinned to the upper row's `c_low`.
pub(crate) fn interpolate(table: &[Breakpoint], concentration: f64) -> u16 {
    for row in table {
        if concentration <= row.c_high {
            let c = concentration.max(row.c_low);
            let slope = f64::from(row.i_high - row.i_low) / (row.c_high - row.c_low);
            let index = (slope * (c - row.c_low) + f64::from(row.i_low)).round();
            return (index as u16).min(AQI_CEILING);
        }
    }
    AQI_CEILING
}

/// Sub-index for one pollutant. An absent, negative or non-finite
/// concentration contributes 0.
pub fn index_for(pollutant: Pollutant, concentration: Option<f64>) -> u16 {
    match concentration {
        Some(c) if c.is_finite() && c >= 0.0 => interpolate(table(pollutant), c),
        _ => 0,
    }
}

/// Maximum sub-index and the pollutant that produced it; ties keep the
/// earlier pollutant in [`Pollutant::ALL`].
pub fn overall_index(levels: &PollutantLevels) -> (u16, Pollutant) {
    let mut best = (0u16, Pollutant::Pm25);
    for pollutant in Pollutant::ALL {
        let index = index_for(pollutant, levels.get(pollutant));
        if index > best.0 {
            best = (index, pollutant);
        }
    }
    best
}

pub fn compute_realtime(levels: &PollutantLevels) -> AqiResult {
    let (value, dominant_pollutant) = overall_index(levels);
    AqiResult {
        value,
        category: AqiCategory::from_index(value),
        dominant_pollutant,
        source: AqiSource::Realtime,
    }
}
