//! Query layer over the account and telemetry databases.
//!
//! Every call checks a connection out of the relevant pool and runs a single
//! independent statement (or a short read-then-write); nothing is held across
//! calls.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::db::models::{Alert, NewAlert, NewDelivery, NewUser, SensorReading, User, UserChanges};
use crate::db::pool::{PgPool, PgPooled};
use crate::schema;
use crate::utils::TagSet;

/// Rows scanned when building a sensor's day-by-day history.
pub const SENSOR_HISTORY_ROWS: i64 = 100;

#[derive(Debug)]
pub enum StoreError {
    /// No connection could be checked out.
    Unavailable(String),
    /// A uniqueness constraint rejected the write.
    Conflict(String),
    Query(DieselError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "database unavailable: {}", e),
            StoreError::Conflict(c) => write!(f, "conflict on {}", c),
            StoreError::Query(e) => write!(f, "query failed: {}", e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Query(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DieselError> for StoreError {
    fn from(value: DieselError) -> Self {
        match value {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.constraint_name().unwrap_or("unique key").to_string())
            }
            other => StoreError::Query(other),
        }
    }
}

/// Identifies one risk for one user in one zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub user_id: i32,
    pub zone_name: String,
    pub risk_type: String,
}

#[derive(Clone)]
pub struct PgStore {
    accounts: PgPool,
    sensors: PgPool,
}

impl PgStore {
    pub fn new(accounts: PgPool, sensors: PgPool) -> Self {
        PgStore { accounts, sensors }
    }

    fn accounts_conn(&self) -> Result<PgPooled, StoreError> {
        self.accounts.get().map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn sensors_conn(&self) -> Result<PgPooled, StoreError> {
        self.sensors.get().map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    // ---- users ----

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        use schema::users::dsl as U;
        let mut conn = self.accounts_conn()?;
        Ok(U::users.select(User::as_select()).order(U::id.asc()).load(&mut conn)?)
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        use schema::users::dsl as U;
        let mut conn = self.accounts_conn()?;
        Ok(U::users
            .filter(U::username.eq(username))
            .select(User::as_select())
            .first(&mut conn)
            .optional()?)
    }

    pub fn find_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        use schema::users::dsl as U;
        let mut conn = self.accounts_conn()?;
        Ok(U::users.find(id).select(User::as_select()).first(&mut conn).optional()?)
    }

    pub fn insert_user(&self, user: &NewUser) -> Result<User, StoreError> {
        use schema::users::dsl as U;
        let mut conn = self.accounts_conn()?;
        Ok(diesel::insert_into(U::users)
            .values(user)
            .returning(User::as_returning())
            .get_result(&mut conn)?)
    }

    pub fn update_user(&self, id: i32, changes: &UserChanges) -> Result<Option<User>, StoreError> {
        use schema::users::dsl as U;
        if changes.is_empty() {
            return self.find_user(id);
        }
        let mut conn = self.accounts_conn()?;
        Ok(diesel::update(U::users.find(id))
            .set(changes)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .optional()?)
    }

    /// Flip membership of `zone` in the user's subscriptions; `None` when the
    /// user does not exist.
    pub fn toggle_zone(&self, id: i32, zone: &str) -> Result<Option<TagSet>, StoreError> {
        use schema::users::dsl as U;
        let mut conn = self.accounts_conn()?;
        let current: Option<Vec<String>> = U::users.find(id).select(U::zones).first(&mut conn).optional()?;
        let Some(current) = current else {
            return Ok(None);
        };
        let mut zones = TagSet::from(current);
        zones.toggle(zone);
        diesel::update(U::users.find(id))
            .set(U::zones.eq(zones.clone().into_vec()))
            .execute(&mut conn)?;
        Ok(Some(zones))
    }

    // ---- alert ledger ----

    pub fn unread_alerts(&self, user_id: i32, limit: i64) -> Result<Vec<Alert>, StoreError> {
        use schema::user_alerts::dsl as A;
        let mut conn = self.accounts_conn()?;
        Ok(A::user_alerts
            .filter(A::user_id.eq(user_id).and(A::is_read.eq(false)))
            .order((A::created_at.desc(), A::id.desc()))
            .limit(limit)
            .select(Alert::as_select())
            .load(&mut conn)?)
    }

    /// Returns false when no alert has this id.
    pub fn mark_alert_read(&self, alert_id: i32) -> Result<bool, StoreError> {
        use schema::user_alerts::dsl as A;
        let mut conn = self.accounts_conn()?;
        let updated = diesel::update(A::user_alerts.find(alert_id))
            .set(A::is_read.eq(true))
            .execute(&mut conn)?;
        Ok(updated > 0)
    }

    pub fn insert_alert(&self, alert: &NewAlert) -> Result<(), StoreError> {
        use schema::user_alerts::dsl as A;
        let mut conn = self.accounts_conn()?;
        diesel::insert_into(A::user_alerts).values(alert).execute(&mut conn)?;
        Ok(())
    }

    pub fn alert_exists_since(&self, key: &AlertKey, since: DateTime<Utc>) -> Result<bool, StoreError> {
        use schema::user_alerts::dsl as A;
        let mut conn = self.accounts_conn()?;
        Ok(diesel::select(diesel::dsl::exists(
            A::user_alerts.filter(
                A::user_id
                    .eq(key.user_id)
                    .and(A::zone_name.eq(&key.zone_name))
                    .and(A::risk_type.eq(&key.risk_type))
                    .and(A::created_at.gt(since)),
            ),
        ))
        .get_result(&mut conn)?)
    }

    pub fn delivery_exists_since(&self, key: &AlertKey, channel: &str, since: DateTime<Utc>) -> Result<bool, StoreError> {
        use schema::alert_deliveries::dsl as D;
        let mut conn = self.accounts_conn()?;
        Ok(diesel::select(diesel::dsl::exists(
            D::alert_deliveries.filter(
                D::user_id
                    .eq(key.user_id)
                    .and(D::zone_name.eq(&key.zone_name))
                    .and(D::risk_type.eq(&key.risk_type))
                    .and(D::channel.eq(channel))
                    .and(D::created_at.gt(since)),
            ),
        ))
        .get_result(&mut conn)?)
    }

    pub fn insert_delivery(&self, delivery: &NewDelivery) -> Result<(), StoreError> {
        use schema::alert_deliveries::dsl as D;
        let mut conn = self.accounts_conn()?;
        diesel::insert_into(D::alert_deliveries).values(delivery).execute(&mut conn)?;
        Ok(())
    }

    /// Drop read alerts and delivery records created before `cutoff`.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<(usize, usize), StoreError> {
        use schema::alert_deliveries::dsl as D;
        use schema::user_alerts::dsl as A;
        let mut conn = self.accounts_conn()?;
        let alerts = diesel::delete(A::user_alerts.filter(A::is_read.eq(true).and(A::created_at.lt(cutoff))))
            .execute(&mut conn)?;
        let deliveries = diesel::delete(D::alert_deliveries.filter(D::created_at.lt(cutoff))).execute(&mut conn)?;
        Ok((alerts, deliveries))
    }

    // ---- sensor telemetry ----

    /// Readings received after `since`, newest first.
    pub fn sensor_readings_since(&self, since: DateTime<Utc>) -> Result<Vec<SensorReading>, StoreError> {
        use schema::mqtt_messages::dsl as M;
        let mut conn = self.sensors_conn()?;
        Ok(M::mqtt_messages
            .filter(M::received_at.ge(since))
            .order((M::received_at.desc(), M::id.desc()))
            .select(SensorReading::as_select())
            .load(&mut conn)?)
    }

    /// Most recent reading of every device.
    pub fn latest_per_device(&self) -> Result<Vec<SensorReading>, StoreError> {
        use schema::mqtt_messages::dsl as M;
        let mut conn = self.sensors_conn()?;
        Ok(M::mqtt_messages
            .distinct_on(M::device_id)
            .order((M::device_id.asc(), M::received_at.desc(), M::id.desc()))
            .select(SensorReading::as_select())
            .load(&mut conn)?)
    }

    /// Latest readings of one device, newest first.
    pub fn device_readings(&self, device_id: &str, limit: i64) -> Result<Vec<SensorReading>, StoreError> {
        use schema::mqtt_messages::dsl as M;
        let mut conn = self.sensors_conn()?;
        Ok(M::mqtt_messages
            .filter(M::device_id.eq(device_id))
            .order((M::received_at.desc(), M::id.desc()))
            .limit(limit)
            .select(SensorReading::as_select())
            .load(&mut conn)?)
    }
}
