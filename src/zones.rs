//! Static registry of monitored zones.
//!
//! The set is fixed at compile time; every other component addresses zones by
//! their exact name.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Zone {
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    /// Device id of the physical sensor installed in the zone, if any.
    pub sensor_id: Option<&'static str>,
}

pub const ZONES: [Zone; 3] = [
    Zone {
        name: "Valbonne",
        latitude: 43.62,
        longitude: 7.01,
        sensor_id: Some("CapteurValbonne"),
    },
    Zone {
        name: "Biot",
        latitude: 43.64,
        longitude: 7.09,
        sensor_id: Some("CapteurBiot"),
    },
    Zone {
        name: "Sophia Antipolis",
        latitude: 43.635,
        longitude: 7.05,
        sensor_id: Some("ESP8266_Zone_B"),
    },
];

pub fn all() -> &'static [Zone] {
    &ZONES
}

pub fn find(name: &str) -> Option<&'static Zone> {
    ZONES.iter().find(|z| z.name == name)
}

pub fn names() -> Vec<&'static str> {
    ZONES.iter().map(|z| z.name).collect()
}

pub fn is_known(name: &str) -> bool {
    find(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_keep_registry_order() {
        assert_eq!(names(), vec!["Valbonne", "Biot", "Sophia Antipolis"]);
    }

    #[test]
    fn lookup_is_exact() {
        assert_eq!(find("Biot").and_then(|z| z.sensor_id), Some("CapteurBiot"));
        assert!(find("biot").is_none());
        assert!(!is_known("Antibes"));
    }
}
