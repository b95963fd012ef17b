//! Account sign-up, login and profile updates.
//!
//! Passwords are stored and compared as submitted; the returned profile is the
//! only client-side session state.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::db::models::{Channel, NewUser, User, UserChanges};
use crate::utils::TagSet;
use crate::zones;

pub const DEFAULT_LANGUAGE: &str = "fr";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    MissingFields,
    UnknownZone(String),
    UnknownUser,
    WrongPassword,
}

impl Display for AccountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AccountError::MissingFields => write!(f, "Champs manquants"),
            AccountError::UnknownZone(z) => write!(f, "Zone inconnue : {}", z),
            AccountError::UnknownUser => write!(f, "Utilisateur introuvable"),
            AccountError::WrongPassword => write!(f, "Mot de passe incorrect"),
        }
    }
}

impl std::error::Error for AccountError {}

/// Usage description stored for a declared purpose.
pub fn purpose_description(key: &str) -> Option<&'static str> {
    match key {
        "firefighter" => Some("Je suis pompier et souhaite prévoir les risques avec précision"),
        "forestGuard" => Some("Je suis garde forestier et souhaite préserver les zones à risque"),
        "insurance" => Some("Je travaille pour une assurance et souhaite voir les zones avec un risque élevé"),
        "housing" => Some("Je cherche un logement et souhaite voir les zones sécurisées"),
        _ => None,
    }
}

fn blank(s: &Option<String>) -> bool {
    s.as_deref().map(str::trim).is_none_or(str::is_empty)
}

fn known_zones(zones: Vec<String>) -> Result<TagSet, AccountError> {
    let set: TagSet = zones.into();
    let unknown = set.iter().find(|z| !zones::is_known(z)).map(str::to_string);
    match unknown {
        Some(unknown) => Err(AccountError::UnknownZone(unknown)),
        None => Ok(set),
    }
}

fn channel_names(channels: Vec<Channel>) -> Vec<String> {
    channels.into_iter().map(|c| c.as_str()).collect::<TagSet>().into_vec()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub purposes: Vec<String>,
    pub langue: Option<String>,
    #[serde(default)]
    pub notifications: Vec<Channel>,
    #[serde(default)]
    pub zones: Vec<String>,
}

impl SignupRequest {
    pub fn into_new_user(self) -> Result<NewUser, AccountError> {
        if blank(&self.username) || blank(&self.email) || blank(&self.password) {
            return Err(AccountError::MissingFields);
        }
        let zones = known_zones(self.zones)?;
        let usage_type = self
            .purposes
            .iter()
            .filter_map(|p| purpose_description(p))
            .collect::<TagSet>()
            .into_vec();
        Ok(NewUser {
            username: self.username.unwrap_or_default().trim().to_string(),
            email: self.email.unwrap_or_default().trim().to_string(),
            password: self.password.unwrap_or_default(),
            usage_type,
            langue: self
                .langue
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            notifications: channel_names(self.notifications),
            zones: zones.into_vec(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Resolve a login attempt against the account found by username.
pub fn check_login(account: Option<User>, password: &str) -> Result<User, AccountError> {
    let user = account.ok_or(AccountError::UnknownUser)?;
    if user.password != password {
        return Err(AccountError::WrongPassword);
    }
    Ok(user)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub langue: Option<String>,
    pub new_password: Option<String>,
    pub notifications: Option<Vec<Channel>>,
    pub zones: Option<Vec<String>>,
}

impl UpdateRequest {
    pub fn into_changes(self) -> Result<UserChanges, AccountError> {
        let non_blank = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let zones = match self.zones {
            Some(z) => Some(known_zones(z)?.into_vec()),
            None => None,
        };
        Ok(UserChanges {
            username: non_blank(self.username),
            email: non_blank(self.email),
            // Only a non-blank new password replaces the stored one.
            password: self.new_password.filter(|p| !p.trim().is_empty()),
            langue: non_blank(self.langue),
            notifications: self.notifications.map(channel_names),
            zones,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleZoneRequest {
    pub zone_name: String,
}

/// Profile returned to the client after login.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub langue: String,
    pub notifications: Vec<String>,
    pub zones: Vec<String>,
}

impl From<User> for Profile {
    fn from(u: User) -> Self {
        Profile {
            id: u.id,
            username: u.username,
            email: u.email,
            langue: u.langue,
            notifications: u.notifications,
            zones: u.zones,
        }
    }
}
