use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load variables from a `.env` file in the working directory.
///
/// Values may contain spaces without quoting. Variables already present in
/// the environment take precedence. Must run before any other thread exists,
/// so `main` calls it ahead of building the tokio runtime.
pub fn load_dotenv() {
    for (key, value) in read_dotenv(Path::new(".env")) {
        // SAFETY: the process is still single-threaded, see above.
        unsafe { std::env::set_var(key, value) };
    }
}

/// Entries of a `.env` file that are not already set in the environment.
fn read_dotenv(path: &Path) -> Vec<(String, String)> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .filter_map(parse_dotenv_line)
        .filter(|(key, _)| std::env::var_os(key).is_none())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Split one `.env` line into key and value, stripping matching quotes.
fn parse_dotenv_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let mut value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value = &value[1..value.len() - 1];
    }
    (!key.is_empty()).then_some((key, value))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub push: PushConfig,
    pub mqtt: MqttConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Identity this device reports for.
    pub user_id: Option<String>,
    /// Root of the JSON document store and local bucket.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub scratch_dir: PathBuf,
    pub duration_secs: u64,
    pub timeout_secs: u64,
    pub program: String,
    pub ffmpeg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub project_id: String,
    pub base_url: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub telemetry_topic: String,
    pub publish_timeout_secs: u64,
    /// Topic carrying remote `{r_ts, r_cmd}` requests.
    pub command_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Helper printing `<temp_f>,<humidity>` on success.
    pub program: String,
    pub retries: u32,
    pub retry_delay_secs: u64,
    /// GPIO value file for the door contact (`1` = open).
    pub door_value_path: PathBuf,
    pub poll_interval_secs: u64,
    /// Publish telemetry once every this many polls.
    pub telemetry_every: u32,
    pub low_temp_warning_f: f64,
    pub low_temp_cooldown_secs: u64,
    /// Remote commands older than this are ignored.
    pub command_window_secs: u64,
}

const DEFAULT_PROJECT_ID: &str = "sensors-gateway";

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sensor-gateway");

        Self {
            gateway: GatewayConfig {
                user_id: None,
                data_dir,
            },
            capture: CaptureConfig {
                scratch_dir: PathBuf::from("/tmp"),
                duration_secs: 5,
                timeout_secs: 30,
                program: "rpicam-vid".to_string(),
                ffmpeg: "ffmpeg".to_string(),
            },
            storage: StorageConfig {
                bucket: default_bucket(DEFAULT_PROJECT_ID),
            },
            push: PushConfig {
                project_id: DEFAULT_PROJECT_ID.to_string(),
                base_url: "https://fcm.googleapis.com".to_string(),
                access_token: None,
                timeout_secs: 10,
            },
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: "sensor-gateway".to_string(),
                username: None,
                password: None,
                telemetry_topic: "sensor-data".to_string(),
                publish_timeout_secs: 10,
                command_topic: "sensorsRefreshRequest".to_string(),
            },
            sensor: SensorConfig {
                program: "read-dht22".to_string(),
                retries: 3,
                retry_delay_secs: 2,
                door_value_path: PathBuf::from("/sys/class/gpio/gpio17/value"),
                poll_interval_secs: 5,
                telemetry_every: 12,
                low_temp_warning_f: 58.0,
                low_temp_cooldown_secs: 8 * 60 * 60,
                command_window_secs: 15,
            },
        }
    }
}

fn default_bucket(project_id: &str) -> String {
    format!("{project_id}.appspot.com")
}

/// Accepts both `gs://name` and bare `name`.
pub fn normalize_bucket(raw: &str) -> String {
    raw.strip_prefix("gs://").unwrap_or(raw).to_string()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Gateway
        if let Ok(user) = std::env::var("GATEWAY_USER_ID") {
            config.gateway.user_id = Some(user);
        }
        if let Ok(dir) = std::env::var("GATEWAY_DATA_DIR") {
            config.gateway.data_dir = PathBuf::from(dir);
        }

        // Capture
        if let Ok(dir) = std::env::var("CAPTURE_SCRATCH_DIR") {
            config.capture.scratch_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_parse("CAPTURE_SECONDS") {
            config.capture.duration_secs = secs;
        }
        if let Some(secs) = env_parse("CAPTURE_TIMEOUT_SECS") {
            config.capture.timeout_secs = secs;
        }
        if let Ok(program) = std::env::var("CAPTURE_PROGRAM") {
            config.capture.program = program;
        }
        if let Ok(ffmpeg) = std::env::var("FFMPEG_PATH") {
            config.capture.ffmpeg = ffmpeg;
        }

        // Push
        if let Ok(project) = std::env::var("GOOGLE_PROJECT_ID") {
            config.storage.bucket = default_bucket(&project);
            config.push.project_id = project;
        }
        if let Ok(url) = std::env::var("FCM_BASE_URL") {
            config.push.base_url = url;
        }
        if let Ok(token) = std::env::var("FCM_ACCESS_TOKEN") {
            config.push.access_token = Some(token);
        }
        if let Some(secs) = env_parse("FCM_TIMEOUT_SECS") {
            config.push.timeout_secs = secs;
        }

        // Storage (after project id so an explicit bucket wins)
        if let Ok(bucket) = std::env::var("STORAGE_BUCKET") {
            config.storage.bucket = normalize_bucket(&bucket);
        }

        // MQTT
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = env_parse("MQTT_BROKER_PORT") {
            config.mqtt.broker_port = port;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Ok(topic) = std::env::var("TELEMETRY_TOPIC") {
            config.mqtt.telemetry_topic = topic;
        }
        if let Some(secs) = env_parse("MQTT_PUBLISH_TIMEOUT_SECS") {
            config.mqtt.publish_timeout_secs = secs;
        }
        if let Ok(topic) = std::env::var("COMMAND_TOPIC") {
            config.mqtt.command_topic = topic;
        }

        // Sensor
        if let Ok(program) = std::env::var("SENSOR_PROGRAM") {
            config.sensor.program = program;
        }
        if let Some(retries) = env_parse("SENSOR_RETRIES") {
            config.sensor.retries = retries;
        }
        if let Some(secs) = env_parse("SENSOR_RETRY_DELAY_SECS") {
            config.sensor.retry_delay_secs = secs;
        }
        if let Ok(path) = std::env::var("DOOR_GPIO_VALUE_PATH") {
            config.sensor.door_value_path = PathBuf::from(path);
        }
        if let Some(secs) = env_parse("SENSOR_POLL_INTERVAL_SECS") {
            config.sensor.poll_interval_secs = secs;
        }
        if let Some(every) = env_parse("TELEMETRY_EVERY_POLLS") {
            config.sensor.telemetry_every = every;
        }
        if let Some(temp) = env_parse("LOW_TEMP_WARNING_F") {
            config.sensor.low_temp_warning_f = temp;
        }
        if let Some(secs) = env_parse("LOW_TEMP_COOLDOWN_SECS") {
            config.sensor.low_temp_cooldown_secs = secs;
        }
        if let Some(secs) = env_parse("COMMAND_WINDOW_SECS") {
            config.sensor.command_window_secs = secs;
        }

        config
    }

    /// Local directory standing in for the object storage bucket.
    pub fn bucket_dir(&self) -> PathBuf {
        self.gateway
            .data_dir
            .join("buckets")
            .join(&self.storage.bucket)
    }
}

impl CaptureConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SensorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn low_temp_cooldown(&self) -> Duration {
        Duration::from_secs(self.low_temp_cooldown_secs)
    }

    pub fn command_window(&self) -> Duration {
        Duration::from_secs(self.command_window_secs)
    }
}
