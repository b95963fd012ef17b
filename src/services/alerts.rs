//! Periodic risk evaluation and alert fan-out.
//!
//! Each tick resolves one reading per zone (sensor first, then the latest API
//! snapshot), evaluates it and, for every subscribed user, writes push alerts
//! to the ledger and sends de-duplicated emails.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use crate::db::models::{Channel, NewAlert, NewDelivery, SensorReading, User};
use crate::db::pool::Readiness;
use crate::db::store::{AlertKey, PgStore};
use crate::models::weather::HistoryDocument;
use crate::services::history::HistoryStore;
use crate::services::notifier::Notifier;
use crate::services::risk::{Reading, ReadingSource, RiskEvaluator, RiskEvent};
use crate::utils::serde_enum_name;
use crate::zones::Zone;

/// Window of sensor data considered "current".
pub const SENSOR_LOOKBACK_MINUTES: i64 = 60;

/// Storage the scheduler needs; implemented by [`PgStore`].
pub trait AlertStore {
    fn users(&self) -> Result<Vec<User>, String>;
    /// Readings received after `since`, newest first.
    fn sensor_readings_since(&self, since: DateTime<Utc>) -> Result<Vec<SensorReading>, String>;
    fn insert_alert(&self, alert: &NewAlert) -> Result<(), String>;
    fn alert_exists_since(&self, key: &AlertKey, since: DateTime<Utc>) -> Result<bool, String>;
    fn email_sent_since(&self, key: &AlertKey, since: DateTime<Utc>) -> Result<bool, String>;
    fn record_email(&self, key: &AlertKey, at: DateTime<Utc>) -> Result<(), String>;
}

impl AlertStore for PgStore {
    fn users(&self) -> Result<Vec<User>, String> {
        self.list_users().map_err(|e| format!("load users failed: {}", e))
    }

    fn sensor_readings_since(&self, since: DateTime<Utc>) -> Result<Vec<SensorReading>, String> {
        PgStore::sensor_readings_since(self, since).map_err(|e| format!("load sensor readings failed: {}", e))
    }

    fn insert_alert(&self, alert: &NewAlert) -> Result<(), String> {
        PgStore::insert_alert(self, alert).map_err(|e| format!("insert alert failed: {}", e))
    }

    fn alert_exists_since(&self, key: &AlertKey, since: DateTime<Utc>) -> Result<bool, String> {
        PgStore::alert_exists_since(self, key, since).map_err(|e| format!("alert lookup failed: {}", e))
    }

    fn email_sent_since(&self, key: &AlertKey, since: DateTime<Utc>) -> Result<bool, String> {
        self.delivery_exists_since(key, Channel::Email.as_str(), since)
            .map_err(|e| format!("delivery lookup failed: {}", e))
    }

    fn record_email(&self, key: &AlertKey, at: DateTime<Utc>) -> Result<(), String> {
        let row = NewDelivery {
            user_id: key.user_id,
            zone_name: key.zone_name.clone(),
            risk_type: key.risk_type.clone(),
            channel: Channel::Email.as_str().to_string(),
            created_at: at,
        };
        self.insert_delivery(&row).map_err(|e| format!("record delivery failed: {}", e))
    }
}

#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// Lookback during which a repeated notification is suppressed.
    pub dedup_window: Duration,
    /// When false every tick still detecting a risk inserts a push alert.
    pub push_dedup: bool,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        AlertPolicy {
            dedup_window: Duration::hours(1),
            push_dedup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub zones_evaluated: usize,
    pub risks: usize,
    pub alerts_inserted: usize,
    pub emails_sent: usize,
    pub emails_suppressed: usize,
}

/// Pick the reading used for a zone: latest last-hour sensor row, else the
/// snapshot of the newest daily summary. `readings` must be newest first.
pub fn resolve_reading(zone: &Zone, readings: &[SensorReading], history: &HistoryDocument) -> Option<Reading> {
    if let Some(sensor_id) = zone.sensor_id
        && let Some(row) = readings.iter().find(|r| r.device_id == sensor_id)
    {
        return Some(Reading {
            source: ReadingSource::Sensor,
            temp: row.temperature,
            hum: row.humidity,
            gaz: row.gas,
            wind: Some(0.0),
            rain: Some(0.0),
        });
    }

    let snapshot = history.latest(zone.name)?.snapshot.as_ref()?;
    Some(Reading {
        source: ReadingSource::Api,
        temp: snapshot.temperature,
        hum: snapshot.humidity,
        wind: snapshot.wind_speed,
        rain: snapshot.precip_prob,
        gaz: Some(0.0),
    })
}

pub fn email_subject(risk: &RiskEvent, zone: &str) -> String {
    format!("ALERTE {} - {}", risk.risk_type.to_uppercase(), zone)
}

pub fn email_body(user: &User, risk: &RiskEvent, zone: &str, source: ReadingSource) -> String {
    format!(
        "Attention {},\n\nRisque détecté via {} sur {}.\nNature : {}.\n\nPrudence,\nL'équipe IoT.",
        user.username,
        source.label(),
        zone,
        risk.message
    )
}

pub struct AlertScheduler<S> {
    store: S,
    history: Arc<HistoryStore>,
    notifier: Arc<dyn Notifier>,
    evaluator: RiskEvaluator,
    policy: AlertPolicy,
    zones: &'static [Zone],
}

impl<S: AlertStore> AlertScheduler<S> {
    pub fn new(
        store: S,
        history: Arc<HistoryStore>,
        notifier: Arc<dyn Notifier>,
        policy: AlertPolicy,
        zones: &'static [Zone],
    ) -> Self {
        AlertScheduler {
            store,
            history,
            notifier,
            evaluator: RiskEvaluator::default(),
            policy,
            zones,
        }
    }

    /// One evaluation pass. Storage errors end the pass early; notifier
    /// failures are logged and skipped.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary, String> {
        let users = self.store.users()?;
        let readings = self
            .store
            .sensor_readings_since(now - Duration::minutes(SENSOR_LOOKBACK_MINUTES))?;
        let history = self.history.load().unwrap_or_else(|e| {
            debug!("No API history available this tick: {}", e);
            HistoryDocument::default()
        });

        let mut summary = TickSummary::default();
        for zone in self.zones {
            let Some(reading) = resolve_reading(zone, &readings, &history) else {
                debug!("No data for {} this tick", zone.name);
                continue;
            };
            summary.zones_evaluated += 1;

            let risks = self.evaluator.evaluate(&reading);
            summary.risks += risks.len();
            for risk in &risks {
                for user in users.iter().filter(|u| u.is_subscribed(zone.name)) {
                    self.dispatch(user, zone, risk, reading.source, now, &mut summary)?;
                }
            }
        }
        Ok(summary)
    }

    fn dispatch(
        &self,
        user: &User,
        zone: &Zone,
        risk: &RiskEvent,
        source: ReadingSource,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) -> Result<(), String> {
        let key = AlertKey {
            user_id: user.id,
            zone_name: zone.name.to_string(),
            risk_type: risk.risk_type.to_string(),
        };
        let since = now - self.policy.dedup_window;
        let wants_push = user.has_channel(Channel::Push);
        let wants_email = user.has_channel(Channel::Email);

        // Both decisions are taken against the ledger as it was before this
        // tick wrote anything for the key.
        let recently_alerted = if wants_email || (wants_push && self.policy.push_dedup) {
            self.store.alert_exists_since(&key, since)?
        } else {
            false
        };
        let email_due = wants_email && !recently_alerted && !self.store.email_sent_since(&key, since)?;

        if wants_push && !(self.policy.push_dedup && recently_alerted) {
            let level = serde_enum_name(&risk.level).unwrap_or_else(|| "High".to_string());
            self.store.insert_alert(&NewAlert {
                user_id: user.id,
                zone_name: key.zone_name.clone(),
                risk_type: key.risk_type.clone(),
                message: risk.message.to_string(),
                level,
                created_at: now,
            })?;
            summary.alerts_inserted += 1;
            info!(
                "[ALERTE] New alert ({}) for {}: {} in {}",
                source.label(),
                user.username,
                risk.risk_type,
                zone.name
            );
        }

        if wants_email {
            if !email_due {
                summary.emails_suppressed += 1;
                return Ok(());
            }
            let subject = email_subject(risk, zone.name);
            let body = email_body(user, risk, zone.name, source);
            match self.notifier.send(&user.email, &subject, &body) {
                Ok(()) => {
                    summary.emails_sent += 1;
                    info!("[EMAIL] {} sent to {}", subject, user.email);
                    if let Err(e) = self.store.record_email(&key, now) {
                        warn!("[EMAIL] sent to {} but not recorded: {}", user.email, e);
                    }
                }
                Err(e) => warn!("[EMAIL] delivery to {} failed: {}", user.email, e),
            }
        }
        Ok(())
    }

    /// Tick every `interval` once `readiness` is open. Ticks run on the calling
    /// thread so they never overlap; a failed tick is logged and the next one
    /// starts from scratch.
    pub fn run_loop(&self, readiness: &Readiness, interval: StdDuration) {
        loop {
            let tick_start = Instant::now();

            if readiness.is_ready() {
                debug!("Checking risks (sensors & API)");
                match self.tick(Utc::now()) {
                    Ok(s) if s.risks > 0 => info!(
                        "Risk check: {} zone(s), {} risk(s), {} alert(s), {} email(s) sent, {} suppressed",
                        s.zones_evaluated, s.risks, s.alerts_inserted, s.emails_sent, s.emails_suppressed
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Risk check failed: {}", e),
                }
            }

            // Maintain steady cadence
            let elapsed = tick_start.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::weather::{DailySummary, Snapshot};
    use crate::services::notifier::testing::RecordingNotifier;
    use crate::services::risk::FIRE;
    use crate::zones;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MemoryStore {
        users: Vec<User>,
        readings: Vec<SensorReading>,
        alerts: RefCell<Vec<NewAlert>>,
        emails: RefCell<Vec<(AlertKey, DateTime<Utc>)>>,
        fail_record: bool,
    }

    impl AlertStore for MemoryStore {
        fn users(&self) -> Result<Vec<User>, String> {
            Ok(self.users.clone())
        }

        fn sensor_readings_since(&self, since: DateTime<Utc>) -> Result<Vec<SensorReading>, String> {
            let mut rows: Vec<_> = self.readings.iter().filter(|r| r.received_at >= since).cloned().collect();
            rows.sort_by(|a, b| b.received_at.cmp(&a.received_at));
            Ok(rows)
        }

        fn insert_alert(&self, alert: &NewAlert) -> Result<(), String> {
            self.alerts.borrow_mut().push(alert.clone());
            Ok(())
        }

        fn alert_exists_since(&self, key: &AlertKey, since: DateTime<Utc>) -> Result<bool, String> {
            Ok(self.alerts.borrow().iter().any(|a| {
                a.user_id == key.user_id
                    && a.zone_name == key.zone_name
                    && a.risk_type == key.risk_type
                    && a.created_at > since
            }))
        }

        fn email_sent_since(&self, key: &AlertKey, since: DateTime<Utc>) -> Result<bool, String> {
            Ok(self.emails.borrow().iter().any(|(k, at)| k == key && *at > since))
        }

        fn record_email(&self, key: &AlertKey, at: DateTime<Utc>) -> Result<(), String> {
            if self.fail_record {
                return Err("record delivery failed: connection reset".into());
            }
            self.emails.borrow_mut().push((key.clone(), at));
            Ok(())
        }
    }

    struct FailingStore;

    impl AlertStore for FailingStore {
        fn users(&self) -> Result<Vec<User>, String> {
            Err("database unavailable".into())
        }
        fn sensor_readings_since(&self, _: DateTime<Utc>) -> Result<Vec<SensorReading>, String> {
            Ok(Vec::new())
        }
        fn insert_alert(&self, _: &NewAlert) -> Result<(), String> {
            Ok(())
        }
        fn alert_exists_since(&self, _: &AlertKey, _: DateTime<Utc>) -> Result<bool, String> {
            Ok(false)
        }
        fn email_sent_since(&self, _: &AlertKey, _: DateTime<Utc>) -> Result<bool, String> {
            Ok(false)
        }
        fn record_email(&self, _: &AlertKey, _: DateTime<Utc>) -> Result<(), String> {
            Ok(())
        }
    }

    fn user(id: i32, channels: &[&str], zones: &[&str]) -> User {
        User {
            id,
            username: format!("user{id}"),
            email: format!("user{id}@example.test"),
            password: "secret".into(),
            usage_type: Vec::new(),
            langue: "fr".into(),
            notifications: channels.iter().map(|c| c.to_string()).collect(),
            zones: zones.iter().map(|z| z.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn smoke(device: &str, at: DateTime<Utc>) -> SensorReading {
        SensorReading {
            id: 1,
            device_id: device.into(),
            temperature: Some(22.0),
            humidity: Some(55.0),
            gas: Some(350.0),
            received_at: at,
        }
    }

    fn empty_history() -> (tempfile::TempDir, Arc<HistoryStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(HistoryStore::new(dir.path().join("storage.json")));
        (dir, store)
    }

    fn scheduler<S: AlertStore>(
        store: S,
        history: Arc<HistoryStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> AlertScheduler<S> {
        AlertScheduler::new(store, history, notifier, AlertPolicy::default(), zones::all())
    }

    fn doc_with_snapshot(zone: &str, snapshot: Snapshot) -> HistoryDocument {
        let mut doc = HistoryDocument::with_zones(zones::names());
        doc.zones.insert(
            zone.to_string(),
            vec![DailySummary {
                date: "2025-07-01".into(),
                temperature: None,
                relativehumidity: None,
                windspeed: None,
                precipitation_probability: None,
                snapshot: Some(snapshot),
            }],
        );
        doc
    }

    #[test]
    fn sensor_beats_api_snapshot() {
        let zone = zones::find("Biot").unwrap();
        let now = Utc::now();
        let doc = doc_with_snapshot(
            "Biot",
            Snapshot {
                temperature: Some(35.0),
                humidity: Some(10.0),
                wind_speed: Some(100.0),
                precip_prob: Some(90.0),
            },
        );
        let readings = vec![smoke("CapteurBiot", now)];
        let reading = resolve_reading(zone, &readings, &doc).expect("reading");
        assert_eq!(reading.source, ReadingSource::Sensor);
        assert_eq!(reading.wind, Some(0.0));
        assert_eq!(reading.rain, Some(0.0));
        assert_eq!(reading.gaz, Some(350.0));
    }

    #[test]
    fn newest_sensor_row_wins() {
        let zone = zones::find("Biot").unwrap();
        let now = Utc::now();
        let mut older = smoke("CapteurBiot", now - Duration::minutes(20));
        older.gas = Some(10.0);
        let readings = vec![smoke("CapteurBiot", now), older];
        let reading = resolve_reading(zone, &readings, &HistoryDocument::default()).unwrap();
        assert_eq!(reading.gaz, Some(350.0));
    }

    #[test]
    fn api_snapshot_used_without_sensor_and_gas_forced_to_zero() {
        let zone = zones::find("Valbonne").unwrap();
        let doc = doc_with_snapshot(
            "Valbonne",
            Snapshot {
                temperature: Some(-2.0),
                humidity: Some(80.0),
                wind_speed: Some(12.0),
                precip_prob: None,
            },
        );
        let reading = resolve_reading(zone, &[smoke("CapteurBiot", Utc::now())], &doc).unwrap();
        assert_eq!(reading.source, ReadingSource::Api);
        assert_eq!(reading.gaz, Some(0.0));
        assert_eq!(reading.wind, Some(12.0));
        assert_eq!(reading.rain, None);
    }

    #[test]
    fn zone_without_any_data_is_skipped() {
        let zone = zones::find("Sophia Antipolis").unwrap();
        assert!(resolve_reading(zone, &[], &HistoryDocument::default()).is_none());
    }

    #[test]
    fn email_suppressed_by_recent_alert_but_push_still_inserted() {
        let now = Utc::now();
        let store = MemoryStore {
            users: vec![user(1, &["push", "email"], &["Biot"])],
            readings: vec![smoke("CapteurBiot", now - Duration::minutes(5))],
            ..Default::default()
        };
        store.alerts.borrow_mut().push(NewAlert {
            user_id: 1,
            zone_name: "Biot".into(),
            risk_type: FIRE.into(),
            message: "critical smoke detected".into(),
            level: "High".into(),
            created_at: now - Duration::minutes(30),
        });
        let (_dir, history) = empty_history();
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(store, history, notifier.clone());

        let summary = sched.tick(now).expect("tick");
        assert_eq!(summary.alerts_inserted, 1);
        assert_eq!(summary.emails_sent, 0);
        assert_eq!(summary.emails_suppressed, 1);
        assert!(notifier.sent().is_empty());
        assert_eq!(sched.store.alerts.borrow().len(), 2);
    }

    #[test]
    fn push_and_email_on_first_detection() {
        let now = Utc::now();
        let store = MemoryStore {
            users: vec![user(1, &["push", "email"], &["Biot"])],
            readings: vec![smoke("CapteurBiot", now)],
            ..Default::default()
        };
        let (_dir, history) = empty_history();
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(store, history, notifier.clone());

        let summary = sched.tick(now).expect("tick");
        assert_eq!(summary.alerts_inserted, 1);
        assert_eq!(summary.emails_sent, 1);
        let sent = notifier.sent();
        assert_eq!(sent[0].to, "user1@example.test");
        assert_eq!(sent[0].subject, "ALERTE INCENDIE - Biot");
        assert!(sent[0].body.contains("via Capteur sur Biot"));

        // Next tick: another push row, no second email.
        let summary = sched.tick(now + Duration::seconds(10)).expect("tick");
        assert_eq!(summary.alerts_inserted, 1);
        assert_eq!(summary.emails_sent, 0);
        assert_eq!(sched.store.alerts.borrow().len(), 2);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn email_only_users_are_not_spammed() {
        let now = Utc::now();
        let store = MemoryStore {
            users: vec![user(2, &["email"], &["Biot"])],
            readings: vec![smoke("CapteurBiot", now), smoke("CapteurBiot", now + Duration::minutes(61))],
            ..Default::default()
        };
        let (_dir, history) = empty_history();
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(store, history, notifier.clone());

        sched.tick(now).expect("tick");
        sched.tick(now + Duration::seconds(10)).expect("tick");
        assert_eq!(notifier.sent().len(), 1);
        assert!(sched.store.alerts.borrow().is_empty());

        // Outside the window, with the risk still present, the email goes out again.
        let summary = sched.tick(now + Duration::minutes(61)).expect("tick");
        assert_eq!(summary.emails_sent, 1);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[test]
    fn failed_delivery_record_does_not_abort_the_fan_out() {
        let now = Utc::now();
        let store = MemoryStore {
            users: vec![user(2, &["email"], &["Biot"]), user(3, &["email", "push"], &["Biot"])],
            readings: vec![smoke("CapteurBiot", now)],
            fail_record: true,
            ..Default::default()
        };
        let (_dir, history) = empty_history();
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(store, history, notifier.clone());

        let summary = sched.tick(now).expect("tick survives the failed write");
        assert_eq!(summary.emails_sent, 2);
        assert_eq!(summary.alerts_inserted, 1);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[test]
    fn push_dedup_policy_limits_ledger_growth() {
        let now = Utc::now();
        let store = MemoryStore {
            users: vec![user(1, &["push"], &["Biot"])],
            readings: vec![smoke("CapteurBiot", now)],
            ..Default::default()
        };
        let (_dir, history) = empty_history();
        let notifier = Arc::new(RecordingNotifier::default());
        let policy = AlertPolicy {
            push_dedup: true,
            ..AlertPolicy::default()
        };
        let sched = AlertScheduler::new(store, history, notifier, policy, zones::all());
        sched.tick(now).expect("tick");
        sched.tick(now + Duration::seconds(10)).expect("tick");
        assert_eq!(sched.store.alerts.borrow().len(), 1);
    }

    #[test]
    fn unsubscribed_and_silent_users_get_nothing() {
        let now = Utc::now();
        let store = MemoryStore {
            users: vec![user(1, &["push", "email"], &["Valbonne"]), user(2, &["daily"], &["Biot"])],
            readings: vec![smoke("CapteurBiot", now)],
            ..Default::default()
        };
        let (_dir, history) = empty_history();
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(store, history, notifier.clone());
        let summary = sched.tick(now).expect("tick");
        assert_eq!(summary.risks, 1);
        assert_eq!(summary.alerts_inserted, 0);
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn failed_email_is_retried_next_tick() {
        let now = Utc::now();
        let store = MemoryStore {
            users: vec![user(3, &["email"], &["Biot"])],
            readings: vec![smoke("CapteurBiot", now)],
            ..Default::default()
        };
        let (_dir, history) = empty_history();
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let sched = scheduler(store, history, notifier);
        let summary = sched.tick(now).expect("tick survives notifier failure");
        assert_eq!(summary.emails_sent, 0);
        assert!(sched.store.emails.borrow().is_empty());
    }

    #[test]
    fn api_history_feeds_zones_without_sensor_data() {
        let now = Utc::now();
        let (_dir, history) = empty_history();
        history
            .append(
                "Valbonne",
                DailySummary {
                    date: "2025-01-10".into(),
                    temperature: Some(-3.0),
                    relativehumidity: Some(70.0),
                    windspeed: Some(95.0),
                    precipitation_probability: Some(20.0),
                    snapshot: Some(Snapshot {
                        temperature: Some(-3.0),
                        humidity: Some(70.0),
                        wind_speed: Some(95.0),
                        precip_prob: Some(20.0),
                    }),
                },
            )
            .expect("append");
        let store = MemoryStore {
            users: vec![user(1, &["push"], &["Valbonne"])],
            ..Default::default()
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(store, history, notifier);
        let summary = sched.tick(now).expect("tick");
        assert_eq!(summary.zones_evaluated, 1);
        let types: Vec<String> = sched.store.alerts.borrow().iter().map(|a| a.risk_type.clone()).collect();
        assert_eq!(types, vec!["Verglas".to_string(), "Tempête".to_string()]);
    }

    #[test]
    fn storage_failure_ends_the_tick() {
        let (_dir, history) = empty_history();
        let sched = scheduler(FailingStore, history, Arc::new(RecordingNotifier::default()));
        assert!(sched.tick(Utc::now()).is_err());
    }
}
