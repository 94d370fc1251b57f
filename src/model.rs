//! Core data types shared by the orchestrator and its collaborators.

use crate::error::ValidationError;
use crate::validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Title used for every push notification.
pub const NOTIFICATION_TITLE: &str = "Sensor Notification";

/// Opaque per-device/user key, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate::validate_identity(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Identity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate::validate_identity(&value)?;
        Ok(Self(value))
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monitored door condition. Parsing is case-exact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DoorState {
    #[strum(serialize = "open")]
    Open,
    #[strum(serialize = "closed")]
    Closed,
}

/// A temperature/humidity sample with its capture time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "temp_f")]
    pub temperature_f: f64,
    #[serde(rename = "humidity")]
    pub humidity_pct: f64,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    /// Sample observed now.
    pub fn new(temperature_f: f64, humidity_pct: f64) -> Self {
        Self {
            temperature_f,
            humidity_pct,
            observed_at: Utc::now(),
        }
    }

    /// Check temperature, humidity and timestamp ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate_temperature(self.temperature_f)?;
        validate::validate_humidity(self.humidity_pct)?;
        validate::validate_timestamp(self.observed_at)
    }
}

/// Latest snapshot for an identity as held by the state store.
///
/// Always written as a full replacement, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub identity: Identity,
    pub state: DoorState,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<Reading>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedState {
    /// Fresh online snapshot stamped with the current time.
    pub fn new(identity: Identity, state: DoorState, reading: Option<Reading>) -> Self {
        Self {
            identity,
            state,
            online: true,
            reading,
            updated_at: Utc::now(),
        }
    }
}

/// A push message built per dispatch and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub recipient_token: String,
    pub title: String,
    pub body: String,
}

impl NotificationMessage {
    /// Door state plus rounded climate values.
    ///
    /// Rounds half away from zero, so 72.5°F reads as 73.
    pub fn door_update(recipient_token: String, state: DoorState, reading: &Reading) -> Self {
        Self {
            recipient_token,
            title: NOTIFICATION_TITLE.to_string(),
            body: format!(
                "Door: {}, Temp: {}\u{00B0}F, Humidity: {}%",
                state,
                reading.temperature_f.round() as i64,
                reading.humidity_pct.round() as i64
            ),
        }
    }
}
