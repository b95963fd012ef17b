//! Zone, weather history and sensor routes.

use actix_web::{HttpResponse, get, post, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::store::SENSOR_HISTORY_ROWS;
use crate::http::AppState;
use crate::http::error::ApiError;
use crate::models::weather::DailySummary;
use crate::services::collector::collect_all;
use crate::services::history::MAX_DAYS;
use crate::services::sensors::{LatestReading, daily_averages};
use crate::zones;

const DEFAULT_HISTORY_DAYS: usize = 7;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<usize>,
}

/// One row of the history chart.
#[derive(Debug, Serialize)]
pub struct HistoryPoint {
    /// "dd/mm"
    pub date: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    #[serde(rename = "windSpeed")]
    pub wind_speed: Option<f64>,
    pub raw: DailySummary,
}

impl From<DailySummary> for HistoryPoint {
    fn from(raw: DailySummary) -> Self {
        let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
            .map(|d| d.format("%d/%m").to_string())
            .unwrap_or_else(|_| raw.date.clone());
        let snapshot = raw.snapshot.as_ref();
        HistoryPoint {
            date,
            temperature: raw.temperature.or_else(|| snapshot.and_then(|s| s.temperature)),
            humidity: raw.relativehumidity.or_else(|| snapshot.and_then(|s| s.humidity)),
            wind_speed: snapshot.and_then(|s| s.wind_speed),
            raw,
        }
    }
}

#[get("/zones")]
pub async fn list_zones() -> HttpResponse {
    HttpResponse::Ok().json(zones::names())
}

#[get("/history/{zone}")]
pub async fn history(
    state: web::Data<AppState>,
    zone: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(ApiError::BadRequest(format!("days doit être compris entre 1 et {}", MAX_DAYS)));
    }
    let zone = zone.into_inner();
    if !zones::is_known(&zone) {
        return Err(ApiError::unknown_zone());
    }
    let store = state.history.clone();
    let rows = web::block(move || store.recent(&zone, days))
        .await?
        .map_err(ApiError::Internal)?;
    let points: Vec<HistoryPoint> = rows.into_iter().map(HistoryPoint::from).collect();
    Ok(HttpResponse::Ok().json(points))
}

#[get("/sensor-history/{zone}")]
pub async fn sensor_history(state: web::Data<AppState>, zone: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let device = zones::find(&zone)
        .and_then(|z| z.sensor_id)
        .ok_or_else(ApiError::unknown_zone)?;
    state.ensure_ready()?;
    let st = state.clone();
    let rows = web::block(move || st.store.device_readings(device, SENSOR_HISTORY_ROWS)).await??;
    Ok(HttpResponse::Ok().json(daily_averages(&rows)))
}

#[get("/latest-sensors")]
pub async fn latest_sensors(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state.ensure_ready()?;
    let st = state.clone();
    let rows = web::block(move || st.store.latest_per_device()).await??;
    let latest: Vec<LatestReading> = rows.into_iter().map(LatestReading::from).collect();
    Ok(HttpResponse::Ok().json(latest))
}

/// Run the daily collection immediately for every zone.
#[post("/fetch-now")]
pub async fn fetch_now(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let st = state.clone();
    let results = web::block(move || {
        collect_all(st.weather.as_ref(), &st.history, zones::all(), st.collector_concurrency)
    })
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "results": results })))
}
