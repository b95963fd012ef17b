//! Daily weather collection: one forecast per zone, reduced to a
//! [`DailySummary`] and upserted into the history store.

use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::thread;

use crate::client::WeatherSource;
use crate::db::store::PgStore;
use crate::models::meteoblue::Forecast;
use crate::models::weather::{DailySummary, Snapshot};
use crate::services::history::HistoryStore;
use crate::utils::{mean, round2};
use crate::zones::Zone;

/// Outcome of one zone's collection attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ZoneOutcome {
    Stored { ok: bool, date: String },
    Failed { ok: bool, error: String },
}

impl ZoneOutcome {
    fn stored(date: String) -> Self {
        ZoneOutcome::Stored { ok: true, date }
    }

    fn failed(error: String) -> Self {
        ZoneOutcome::Failed { ok: false, error }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ZoneOutcome::Stored { .. })
    }
}

/// Reduce the hourly block to the first calendar day it contains.
///
/// Metrics are averaged over that day's samples ignoring nulls and rounded to
/// two decimals; the first sample is kept verbatim as the snapshot.
pub fn compute_daily_summary(forecast: &Forecast) -> Option<DailySummary> {
    let hourly = forecast.data_1h.as_ref()?;
    let target = hourly.day_of(0)?;
    let indices: Vec<usize> = (0..hourly.time.len())
        .filter(|&i| hourly.day_of(i) == Some(target))
        .collect();
    let first = *indices.first()?;

    let average = |series: &Option<Vec<Option<f64>>>| -> Option<f64> {
        let series = series.as_ref()?;
        mean(indices.iter().map(|&i| series.get(i).copied().flatten())).map(round2)
    };
    let at_first = |series: &Option<Vec<Option<f64>>>| -> Option<f64> {
        series.as_ref().and_then(|s| s.get(first).copied().flatten())
    };

    Some(DailySummary {
        date: target.to_string(),
        temperature: average(&hourly.temperature),
        relativehumidity: average(&hourly.relativehumidity),
        windspeed: average(&hourly.windspeed),
        precipitation_probability: average(&hourly.precipitation_probability),
        snapshot: Some(Snapshot {
            temperature: at_first(&hourly.temperature),
            humidity: at_first(&hourly.relativehumidity),
            wind_speed: at_first(&hourly.windspeed),
            precip_prob: at_first(&hourly.precipitation_probability),
        }),
    })
}

pub fn collect_zone(source: &dyn WeatherSource, store: &HistoryStore, zone: &Zone) -> Result<DailySummary, String> {
    info!("Collector: fetching forecast for {}", zone.name);
    let forecast = source
        .fetch(zone)
        .map_err(|e| format!("weather fetch for {} failed: {}", zone.name, e))?;
    let summary = compute_daily_summary(&forecast)
        .ok_or_else(|| format!("no hourly data to summarise for {}", zone.name))?;
    store.append(zone.name, summary.clone())?;
    info!("Collector: stored summary for {} ({})", zone.name, summary.date);
    Ok(summary)
}

/// Collect every zone, at most `concurrency` at a time. A failing zone never
/// prevents the others from being collected.
pub fn collect_all(
    source: &dyn WeatherSource,
    store: &HistoryStore,
    zones: &[Zone],
    concurrency: NonZeroUsize,
) -> BTreeMap<String, ZoneOutcome> {
    let mut results = BTreeMap::new();
    for batch in zones.chunks(concurrency.get()) {
        let outcomes: Vec<(&str, Result<DailySummary, String>)> = if batch.len() == 1 {
            batch.iter().map(|z| (z.name, collect_zone(source, store, z))).collect()
        } else {
            thread::scope(|s| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|z| (z.name, s.spawn(move || collect_zone(source, store, z))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(name, h)| {
                        let res = h
                            .join()
                            .unwrap_or_else(|_| Err(format!("collector for {} panicked", name)));
                        (name, res)
                    })
                    .collect()
            })
        };
        for (name, res) in outcomes {
            let outcome = match res {
                Ok(summary) => ZoneOutcome::stored(summary.date),
                Err(e) => {
                    error!("Collector: {}", e);
                    ZoneOutcome::failed(e)
                }
            };
            results.insert(name.to_string(), outcome);
        }
    }
    results
}

/// Next local wall-clock occurrence of `at` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now { today } else { today + Duration::days(1) }
}

fn purge_expired(db: &PgStore, retention_days: u32, now: DateTime<Utc>) {
    let cutoff = now - Duration::days(i64::from(retention_days));
    match db.purge_before(cutoff) {
        Ok((alerts, deliveries)) => info!(
            "Retention: purged {} read alert(s) and {} delivery record(s) older than {}",
            alerts, deliveries, cutoff
        ),
        Err(e) => warn!("Retention purge failed: {}", e),
    }
}

/// Run the collection every day at `at` (local time), forever.
pub fn run_daily_loop(
    source: &dyn WeatherSource,
    store: &HistoryStore,
    zones: &[Zone],
    at: NaiveTime,
    concurrency: NonZeroUsize,
    retention: Option<(&PgStore, u32)>,
) {
    loop {
        let now = Local::now().naive_local();
        let next = next_run_after(now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        info!("Collector: next daily run at {} (in {}s)", next, wait.as_secs());
        thread::sleep(wait);

        info!("Collector: starting daily fetch of {} zone(s)", zones.len());
        let results = collect_all(source, store, zones, concurrency);
        let ok = results.values().filter(|o| o.is_ok()).count();
        info!("Collector: daily fetch done ({}/{} zone(s) stored)", ok, results.len());

        if let Some((db, days)) = retention {
            purge_expired(db, days, Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WeatherClientError;
    use crate::models::meteoblue::HourlyData;
    use crate::zones::ZONES;
    use chrono::NaiveDate;

    fn hourly(times: &[&str], temps: Vec<Option<f64>>) -> Forecast {
        Forecast {
            data_1h: Some(HourlyData {
                time: times.iter().map(|t| t.to_string()).collect(),
                temperature: Some(temps),
                relativehumidity: Some(vec![Some(40.0); times.len()]),
                windspeed: None,
                precipitation_probability: Some(vec![None; times.len()]),
            }),
        }
    }

    #[test]
    fn averages_ignore_nulls_and_other_days() {
        let forecast = hourly(
            &["2025-07-01 00:00", "2025-07-01 01:00", "2025-07-01 02:00", "2025-07-02 00:00"],
            vec![Some(10.0), None, Some(20.0), Some(99.0)],
        );
        let summary = compute_daily_summary(&forecast).expect("summary");
        assert_eq!(summary.date, "2025-07-01");
        assert_eq!(summary.temperature, Some(15.0));
        assert_eq!(summary.relativehumidity, Some(40.0));
        assert_eq!(summary.windspeed, None);
        assert_eq!(summary.precipitation_probability, None);
        let snap = summary.snapshot.expect("snapshot");
        assert_eq!(snap.temperature, Some(10.0));
        assert_eq!(snap.wind_speed, None);
    }

    #[test]
    fn averages_are_rounded() {
        let forecast = hourly(
            &["2025-07-01 00:00", "2025-07-01 01:00", "2025-07-01 02:00"],
            vec![Some(10.0), Some(10.0), Some(10.01)],
        );
        assert_eq!(compute_daily_summary(&forecast).and_then(|s| s.temperature), Some(10.0));
    }

    #[test]
    fn empty_payload_has_no_summary() {
        assert!(compute_daily_summary(&Forecast::default()).is_none());
        assert!(compute_daily_summary(&hourly(&[], vec![])).is_none());
    }

    #[test]
    fn next_run_rolls_over_midnight() {
        let at = NaiveTime::from_hms_opt(0, 5, 0).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let before = day.and_hms_opt(0, 1, 0).unwrap();
        assert_eq!(next_run_after(before, at), day.and_time(at));
        let exactly = day.and_time(at);
        assert_eq!(next_run_after(exactly, at), day.succ_opt().unwrap().and_time(at));
    }

    struct StubSource;

    impl WeatherSource for StubSource {
        fn fetch(&self, zone: &Zone) -> Result<Forecast, WeatherClientError> {
            if zone.name == "Biot" {
                return Err(WeatherClientError::Http {
                    status: 500,
                    message: "Internal Server Error".into(),
                });
            }
            Ok(hourly(&["2025-07-01 00:00"], vec![Some(18.0)]))
        }
    }

    #[test]
    fn one_failing_zone_does_not_block_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = HistoryStore::new(dir.path().join("storage.json"));
        for concurrency in [1, 3] {
            let results = collect_all(&StubSource, &store, &ZONES, NonZeroUsize::new(concurrency).unwrap());
            assert_eq!(results.len(), 3);
            assert!(!results["Biot"].is_ok());
            assert_eq!(results["Valbonne"], ZoneOutcome::stored("2025-07-01".into()));
            assert!(results["Sophia Antipolis"].is_ok());
        }
        let doc = store.load().expect("load");
        assert_eq!(doc.zones["Valbonne"].len(), 1);
        assert!(doc.zones.get("Biot").map(Vec::is_empty).unwrap_or(true));
    }

    #[test]
    fn outcome_json_shape() {
        let ok = serde_json::to_value(ZoneOutcome::stored("2025-07-01".into())).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "date": "2025-07-01"}));
        let ko = serde_json::to_value(ZoneOutcome::failed("boom".into())).unwrap();
        assert_eq!(ko, serde_json::json!({"ok": false, "error": "boom"}));
    }
}
