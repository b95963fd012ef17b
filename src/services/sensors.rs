//! Day-by-day view of a sensor's raw readings.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::models::SensorReading;
use crate::utils::{mean, round2};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDay {
    /// "dd/mm"
    pub date: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gaz: Option<f64>,
}

/// Latest row of one device, in the field names the dashboard reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    pub id: i64,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub temperature: Option<f64>,
    #[serde(rename = "humidite")]
    pub humidity: Option<f64>,
    #[serde(rename = "gaz")]
    pub gas: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl From<SensorReading> for LatestReading {
    fn from(r: SensorReading) -> Self {
        LatestReading {
            id: r.id,
            device_id: r.device_id,
            temperature: r.temperature,
            humidity: r.humidity,
            gas: r.gas,
            received_at: r.received_at,
        }
    }
}

/// Group readings by UTC calendar day and average each metric, oldest day
/// first. Temperature and humidity keep two decimals, gas is rounded to a
/// whole number.
pub fn daily_averages(readings: &[SensorReading]) -> Vec<SensorDay> {
    let mut days: BTreeMap<NaiveDate, Vec<&SensorReading>> = BTreeMap::new();
    for r in readings {
        days.entry(r.received_at.date_naive()).or_default().push(r);
    }
    days.into_iter()
        .map(|(day, rows)| SensorDay {
            date: day.format("%d/%m").to_string(),
            temperature: mean(rows.iter().map(|r| r.temperature)).map(round2),
            humidity: mean(rows.iter().map(|r| r.humidity)).map(round2),
            gaz: mean(rows.iter().map(|r| r.gas)).map(f64::round),
        })
        .collect()
}
