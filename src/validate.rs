//! Input validation for identities, door states and sensor readings.
//!
//! All checks are pure and total: they never panic on well-typed input and
//! only reject malformed or out-of-range values.

use crate::error::ValidationError;
use crate::model::DoorState;
use chrono::{DateTime, Utc};
use std::ops::RangeInclusive;

/// Required identity length.
pub const IDENTITY_LEN: usize = 28;

/// Accepted temperature range in degrees Fahrenheit.
pub const TEMPERATURE_RANGE_F: RangeInclusive<f64> = -40.0..=125.0;

/// Accepted relative humidity range in percent.
pub const HUMIDITY_RANGE_PCT: RangeInclusive<f64> = 0.0..=100.0;

/// Identity must be exactly [`IDENTITY_LEN`] ASCII alphanumeric characters.
pub fn validate_identity(id: &str) -> Result<(), ValidationError> {
    if id.len() == IDENTITY_LEN && id.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentity)
    }
}

/// Case-exact match against `open` / `closed`.
pub fn validate_state(s: &str) -> Result<DoorState, ValidationError> {
    s.parse::<DoorState>()
        .map_err(|_| ValidationError::InvalidState(s.to_string()))
}

/// NaN is never inside the range, so it is rejected too.
pub fn validate_temperature(t: f64) -> Result<(), ValidationError> {
    if TEMPERATURE_RANGE_F.contains(&t) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTemperature(t))
    }
}

pub fn validate_humidity(h: f64) -> Result<(), ValidationError> {
    if HUMIDITY_RANGE_PCT.contains(&h) {
        Ok(())
    } else {
        Err(ValidationError::InvalidHumidity(h))
    }
}

/// Observation times before the Unix epoch are rejected.
pub fn validate_timestamp(ts: DateTime<Utc>) -> Result<(), ValidationError> {
    let secs = ts.timestamp();
    if secs >= 0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidTimestamp(secs))
    }
}
