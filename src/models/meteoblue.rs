//! Payload of the Meteoblue `basic-1h_basic-day` package.
//!
//! Only the hourly block is modelled; the daily block and metadata are ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Forecast {
    #[serde(default)]
    pub data_1h: Option<HourlyData>,
}

/// Column-oriented hourly samples. Each metric array is aligned with `time`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourlyData {
    /// Local timestamps, "YYYY-MM-DD HH:MM".
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub relativehumidity: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub windspeed: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub precipitation_probability: Option<Vec<Option<f64>>>,
}

impl HourlyData {
    /// Calendar day part of the sample at `index`.
    pub fn day_of(&self, index: usize) -> Option<&str> {
        self.time
            .get(index)
            .map(|t| t.split_once(' ').map(|(day, _)| day).unwrap_or(t.as_str()))
    }
}
