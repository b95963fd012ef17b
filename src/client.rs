//! Blocking HTTP client for the Meteoblue forecast API.
//!
//! - Uses `ureq` (no async); one shared agent per process.
//! - Only the `basic-1h_basic-day` package is requested, one call per zone.

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::models::meteoblue::Forecast;
use crate::zones::Zone;

pub const DEFAULT_BASE_URL: &str = "https://my.meteoblue.com/packages/basic-1h_basic-day";

#[derive(Debug)]
pub enum WeatherClientError {
    MissingApiKey,
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
}

impl core::fmt::Display for WeatherClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WeatherClientError::MissingApiKey => write!(f, "METEOBLUE_API_KEY is not configured"),
            WeatherClientError::Transport(s) => write!(f, "transport error: {}", s),
            WeatherClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            WeatherClientError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
        }
    }
}

impl std::error::Error for WeatherClientError {}

impl From<ureq::Error> for WeatherClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::StatusCode(status) => WeatherClientError::Http {
                status,
                message: http::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("unexpected status")
                    .to_string(),
            },
            other => WeatherClientError::Transport(other.to_string()),
        }
    }
}

/// Anything able to produce a forecast payload for a zone.
pub trait WeatherSource: Send + Sync {
    fn fetch(&self, zone: &Zone) -> Result<Forecast, WeatherClientError>;
}

pub struct WeatherClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        WeatherClient {
            agent,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn get_json<T: DeserializeOwned>(&self, query: &[(&str, String)]) -> Result<T, WeatherClientError> {
        let mut req = self.agent.get(&self.base_url).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(*k, v);
        }
        let mut resp = req.call()?;
        let text = resp
            .body_mut()
            .read_to_string()
            .map_err(|e| WeatherClientError::Transport(e.to_string()))?;
        decode_json(&text)
    }
}

impl WeatherSource for WeatherClient {
    fn fetch(&self, zone: &Zone) -> Result<Forecast, WeatherClientError> {
        let api_key = self.api_key.as_deref().ok_or(WeatherClientError::MissingApiKey)?;
        self.get_json(&[
            ("lat", zone.latitude.to_string()),
            ("lon", zone.longitude.to_string()),
            ("apikey", api_key.to_string()),
        ])
    }
}

fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, WeatherClientError> {
    let de = &mut serde_json::Deserializer::from_str(text);
    serde_path_to_error::deserialize(de).map_err(WeatherClientError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones;

    #[test]
    fn missing_key_fails_before_any_request() {
        let client = WeatherClient::new("http://127.0.0.1:9/unused", None, Duration::from_secs(1));
        let zone = zones::find("Biot").expect("known zone");
        assert!(matches!(client.fetch(zone), Err(WeatherClientError::MissingApiKey)));
    }

    #[test]
    fn decode_errors_report_the_offending_path() {
        let err = decode_json::<Forecast>(r#"{"data_1h": {"time": [1]}}"#).expect_err("bad payload");
        let msg = err.to_string();
        assert!(msg.contains("data_1h.time"), "unexpected message: {msg}");
    }

    #[test]
    fn status_errors_carry_reason() {
        let err = WeatherClientError::from(ureq::Error::StatusCode(403));
        assert_eq!(err.to_string(), "http 403: Forbidden");
    }
}
