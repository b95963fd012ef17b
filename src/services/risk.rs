//! Threshold-based risk evaluation.
//!
//! Each rule is evaluated independently so a single reading may raise several
//! risk types. Rules hold severity bands ordered from most to least severe;
//! the first band crossed decides the level. The shipped table only has
//! `High` bands, lower bands can be added without touching the evaluator.

use serde::{Deserialize, Serialize};

pub const FIRE: &str = "Incendie";
pub const FLOOD: &str = "Inondation";
pub const ICE: &str = "Verglas";
pub const STORM: &str = "Tempête";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Where a zone reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingSource {
    #[serde(rename = "Capteur")]
    Sensor,
    #[serde(rename = "API")]
    Api,
}

impl ReadingSource {
    pub const fn label(self) -> &'static str {
        match self {
            ReadingSource::Sensor => "Capteur",
            ReadingSource::Api => "API",
        }
    }
}

/// Current physical conditions of a zone. Absent values never trigger a rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub source: ReadingSource,
    pub temp: Option<f64>,
    pub hum: Option<f64>,
    pub wind: Option<f64>,
    pub rain: Option<f64>,
    pub gaz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    #[serde(rename = "type")]
    pub risk_type: &'static str,
    pub level: Severity,
    pub message: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub limit: f64,
    pub level: Severity,
}

const fn high(limit: f64) -> Band {
    Band {
        limit,
        level: Severity::High,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Gas concentration strictly above the limit.
    pub smoke_gas: Vec<Band>,
    /// Temperature strictly above the limit while humidity is strictly below.
    pub heat_temp: f64,
    pub drought_hum: f64,
    pub heat_level: Severity,
    /// Precipitation probability (%) strictly above the limit.
    pub flood_rain: Vec<Band>,
    /// Temperature at or below the limit.
    pub ice_temp: Vec<Band>,
    /// Wind speed strictly above the limit.
    pub storm_wind: Vec<Band>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            smoke_gas: vec![high(200.0)],
            heat_temp: 30.0,
            drought_hum: 30.0,
            heat_level: Severity::High,
            flood_rain: vec![high(80.0)],
            ice_temp: vec![high(0.0)],
            storm_wind: vec![high(90.0)],
        }
    }
}

fn first_above(bands: &[Band], value: Option<f64>) -> Option<Severity> {
    let value = value?;
    bands.iter().find(|b| value > b.limit).map(|b| b.level)
}

fn first_at_or_below(bands: &[Band], value: Option<f64>) -> Option<Severity> {
    let value = value?;
    bands.iter().find(|b| value <= b.limit).map(|b| b.level)
}

#[derive(Debug, Clone, Default)]
pub struct RiskEvaluator {
    pub thresholds: Thresholds,
}

impl RiskEvaluator {
    pub fn new(thresholds: Thresholds) -> Self {
        RiskEvaluator { thresholds }
    }

    pub fn evaluate(&self, r: &Reading) -> Vec<RiskEvent> {
        let t = &self.thresholds;
        let mut risks = Vec::new();

        // Smoke wins over the heat/drought heuristic: at most one fire event.
        if let Some(level) = first_above(&t.smoke_gas, r.gaz) {
            risks.push(RiskEvent {
                risk_type: FIRE,
                level,
                message: "critical smoke detected",
            });
        } else if let (Some(temp), Some(hum)) = (r.temp, r.hum)
            && temp > t.heat_temp
            && hum < t.drought_hum
        {
            risks.push(RiskEvent {
                risk_type: FIRE,
                level: t.heat_level,
                message: "heatwave + drought conditions",
            });
        }

        if let Some(level) = first_above(&t.flood_rain, r.rain) {
            risks.push(RiskEvent {
                risk_type: FLOOD,
                level,
                message: "heavy precipitation",
            });
        }

        if let Some(level) = first_at_or_below(&t.ice_temp, r.temp) {
            risks.push(RiskEvent {
                risk_type: ICE,
                level,
                message: "sub-zero temperatures",
            });
        }

        if let Some(level) = first_above(&t.storm_wind, r.wind) {
            risks.push(RiskEvent {
                risk_type: STORM,
                level,
                message: "violent winds",
            });
        }

        risks
    }
}

/// Evaluate with the default threshold table.
pub fn evaluate(reading: &Reading) -> Vec<RiskEvent> {
    RiskEvaluator::default().evaluate(reading)
}
