mod breakpoints;
mod resolver;

pub use breakpoints::{compute_realtime, index_for, overall_index, Breakpoint, AQI_CEILING};
pub use resolver::{AggregatePolicy, AqiResolver};

use crate::reading::Pollutant;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_index(value: u16) -> Self {
        match value {
            0..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthyForSensitive,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitive => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AqiCategory {
    type Err = String;

    /// Accepts display labels and snake/camel case spellings alike.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "good" => Ok(Self::Good),
            "moderate" => Ok(Self::Moderate),
            "unhealthyforsensitive" | "unhealthyforsensitivegroups" | "usg" => {
                Ok(Self::UnhealthyForSensitive)
            }
            "unhealthy" => Ok(Self::Unhealthy),
            "veryunhealthy" => Ok(Self::VeryUnhealthy),
            "hazardous" => Ok(Self::Hazardous),
            _ => Err(format!("unknown AQI category {raw:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiSource {
    Realtime,
    Hourly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AqiResult {
    pub value: u16,
    pub category: AqiCategory,
    pub dominant_pollutant: Pollutant,
    pub source: AqiSource,
}
