//! Door contact from a GPIO value file, climate from a helper program.

use super::SensorSource;
use crate::config::SensorConfig;
use crate::error::SensorError;
use crate::model::{DoorState, Reading};
use crate::validate;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// The DHT22 reports exactly 0°C / 0% when a read silently fails.
const SENTINEL_READING: (f64, f64) = (32.0, 0.0);

pub struct CommandSensor {
    program: String,
    door_value_path: PathBuf,
    retries: u32,
    retry_delay: Duration,
}

impl CommandSensor {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            program: config.program.clone(),
            door_value_path: config.door_value_path.clone(),
            retries: config.retries.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    async fn read_once(&self) -> Result<Reading, SensorError> {
        let output = Command::new(&self.program)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SensorError::Helper {
                program: self.program.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SensorError::Helper {
                program: self.program.clone(),
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (temperature_f, humidity_pct) = parse_reading(&stdout)?;
        check_plausible(temperature_f, humidity_pct)?;
        Ok(Reading::new(temperature_f, humidity_pct))
    }
}

/// Parse the helper's single `"<temp_f>,<humidity>"` line.
fn parse_reading(output: &str) -> Result<(f64, f64), SensorError> {
    let line = output.trim();
    let parse_err = || SensorError::Parse(line.to_string());

    let (t, h) = line.split_once(',').ok_or_else(parse_err)?;
    let t = t.trim().parse().map_err(|_| parse_err())?;
    let h = h.trim().parse().map_err(|_| parse_err())?;
    Ok((t, h))
}

fn check_plausible(temperature_f: f64, humidity_pct: f64) -> Result<(), SensorError> {
    if (temperature_f, humidity_pct) == SENTINEL_READING {
        return Err(SensorError::Implausible(format!(
            "{temperature_f:.1}\u{00B0}F, {humidity_pct:.1}%"
        )));
    }
    if validate::validate_temperature(temperature_f).is_err()
        || validate::validate_humidity(humidity_pct).is_err()
    {
        return Err(SensorError::Implausible(format!(
            "out of range {temperature_f:.2}\u{00B0}F, {humidity_pct:.2}%"
        )));
    }
    Ok(())
}

/// GPIO value files contain `1` (high, open) or `0` (low, closed).
fn parse_door_level(raw: &str) -> Result<DoorState, SensorError> {
    match raw.trim() {
        "1" => Ok(DoorState::Open),
        "0" => Ok(DoorState::Closed),
        other => Err(SensorError::Parse(other.to_string())),
    }
}

#[async_trait]
impl SensorSource for CommandSensor {
    async fn door_state(&self) -> Result<DoorState, SensorError> {
        let raw = tokio::fs::read_to_string(&self.door_value_path).await?;
        parse_door_level(&raw)
    }

    async fn reading(&self) -> Option<Reading> {
        for attempt in 1..=self.retries {
            match self.read_once().await {
                Ok(reading) => {
                    debug!(
                        "[Sensor] Reading: Temp: {:.2} \u{00B0}F, Humidity: {:.2} %",
                        reading.temperature_f, reading.humidity_pct
                    );
                    return Some(reading);
                }
                Err(e) => {
                    warn!(
                        "[Sensor] Read failed, attempt {}/{}: {}",
                        attempt, self.retries, e
                    );
                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn sensor(program: &str, door_value_path: PathBuf) -> CommandSensor {
        let mut config = Config::default().sensor;
        config.program = program.to_string();
        config.door_value_path = door_value_path;
        config.retries = 2;
        config.retry_delay_secs = 0;
        CommandSensor::new(&config)
    }

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading("72.5,45.0\n").unwrap(), (72.5, 45.0));
        assert_eq!(parse_reading(" -3.1 , 99.9 ").unwrap(), (-3.1, 99.9));
        assert!(matches!(parse_reading("72.5"), Err(SensorError::Parse(_))));
        assert!(matches!(parse_reading("warm,wet"), Err(SensorError::Parse(_))));
        assert!(matches!(parse_reading(""), Err(SensorError::Parse(_))));
    }

    #[test]
    fn test_sentinel_and_range_are_implausible() {
        assert!(check_plausible(72.5, 45.0).is_ok());
        assert!(check_plausible(32.0, 0.0).is_err());
        assert!(check_plausible(32.0, 10.0).is_ok());
        assert!(check_plausible(130.0, 45.0).is_err());
        assert!(check_plausible(70.0, 101.0).is_err());
    }

    #[test]
    fn test_parse_door_level() {
        assert_eq!(parse_door_level("1\n").unwrap(), DoorState::Open);
        assert_eq!(parse_door_level("0").unwrap(), DoorState::Closed);
        assert!(parse_door_level("high").is_err());
    }

    #[tokio::test]
    async fn test_door_state_from_value_file() {
        let path = std::env::temp_dir().join(format!("gpio-value-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, "1\n").unwrap();
        let s = sensor("true", path.clone());
        assert_eq!(s.door_state().await.unwrap(), DoorState::Open);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_missing_helper_yields_none() {
        let s = sensor("definitely-not-a-dht22-helper", PathBuf::from("/nonexistent"));
        assert!(s.reading().await.is_none());
        assert!(matches!(s.door_state().await, Err(SensorError::Io(_))));
    }
}
