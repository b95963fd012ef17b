//! Documents persisted in the weather history file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First hourly sample of the day, kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    #[serde(rename = "windSpeed")]
    pub wind_speed: Option<f64>,
    #[serde(rename = "precipProb")]
    pub precip_prob: Option<f64>,
}

/// One calendar day of weather for a zone: four daily averages plus the raw
/// first-hour snapshot. `date` is the natural key within a zone's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    /// ISO day, "YYYY-MM-DD".
    pub date: String,
    pub temperature: Option<f64>,
    pub relativehumidity: Option<f64>,
    pub windspeed: Option<f64>,
    pub precipitation_probability: Option<f64>,
    #[serde(default)]
    pub snapshot: Option<Snapshot>,
}

/// Whole history file: per-zone summaries ordered oldest to newest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub zones: BTreeMap<String, Vec<DailySummary>>,
}

impl HistoryDocument {
    pub fn with_zones<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        HistoryDocument {
            zones: names.into_iter().map(|n| (n.to_string(), Vec::new())).collect(),
        }
    }

    pub fn latest(&self, zone: &str) -> Option<&DailySummary> {
        self.zones.get(zone).and_then(|h| h.last())
    }
}
