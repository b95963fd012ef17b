//! Diesel model structs for accounts, alerts and sensor telemetry.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

/// Notification channels a user can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
    Email,
    Daily,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub usage_type: Vec<String>,
    pub langue: String,
    pub notifications: Vec<String>,
    pub zones: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_channel(&self, channel: Channel) -> bool {
        self.notifications.iter().any(|n| n == channel.as_str())
    }

    pub fn is_subscribed(&self, zone: &str) -> bool {
        self.zones.iter().any(|z| z == zone)
    }
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub usage_type: Vec<String>,
    pub langue: String,
    pub notifications: Vec<String>,
    pub zones: Vec<String>,
}

/// Partial profile update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = schema::users)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub langue: Option<String>,
    pub notifications: Option<Vec<String>>,
    pub zones: Option<Vec<String>>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.langue.is_none()
            && self.notifications.is_none()
            && self.zones.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::user_alerts)]
#[diesel(belongs_to(User))]
pub struct Alert {
    pub id: i32,
    pub user_id: i32,
    pub zone_name: String,
    pub risk_type: String,
    pub message: String,
    pub level: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::user_alerts)]
pub struct NewAlert {
    pub user_id: i32,
    pub zone_name: String,
    pub risk_type: String,
    pub message: String,
    pub level: String,
    pub created_at: DateTime<Utc>,
}

/// Record of a notification sent outside the alert ledger (email).
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::alert_deliveries)]
pub struct NewDelivery {
    pub user_id: i32,
    pub zone_name: String,
    pub risk_type: String,
    pub channel: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = schema::mqtt_messages)]
pub struct SensorReading {
    pub id: i64,
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas: Option<f64>,
    pub received_at: DateTime<Utc>,
}
