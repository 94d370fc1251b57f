//! Remote commands delivered over MQTT.
//!
//! A request is JSON `{"r_ts": <unix seconds>, "r_cmd": <code>}`. Code `0`
//! asks for a refresh (forced state update and notification), code `1` for a
//! status report. Requests issued in the future or longer ago than the
//! freshness window are dropped.

use crate::config::MqttConfig;
use crate::telemetry::mqtt_options;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CommandRequest {
    /// Unix seconds when the request was issued.
    pub r_ts: i64,
    pub r_cmd: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Refresh,
    Status,
    Unknown(i32),
}

impl From<i32> for RemoteCommand {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Refresh,
            1 => Self::Status,
            other => Self::Unknown(other),
        }
    }
}

impl CommandRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn command(&self) -> RemoteCommand {
        self.r_cmd.into()
    }

    /// Issued no later than `now` and less than `window` before it.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let delta = self.r_ts.saturating_sub(now.timestamp());
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        delta <= 0 && delta > -window
    }
}

/// Subscribes to the command topic and forwards raw payloads.
pub struct MqttCommandListener {
    client: AsyncClient,
    event_loop: EventLoop,
    topic: String,
}

impl MqttCommandListener {
    /// Uses its own client id (`<client_id>-commands`) next to the telemetry client.
    pub fn new(config: &MqttConfig) -> Self {
        let client_id = format!("{}-commands", config.client_id);
        let (client, event_loop) = AsyncClient::new(mqtt_options(config, &client_id), 10);
        Self {
            client,
            event_loop,
            topic: config.command_topic.clone(),
        }
    }

    /// Run until the receiving side goes away.
    pub async fn run(mut self, tx: mpsc::Sender<Vec<u8>>) {
        info!("[Commands] Listening on MQTT topic: {}", self.topic);

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // Clean sessions drop subscriptions on every reconnect.
                    if let Err(e) = self.client.try_subscribe(&self.topic, QoS::AtLeastOnce) {
                        error!("[Commands] Failed to subscribe to {}: {}", self.topic, e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == self.topic => {
                    debug!("[Commands] Received {} byte request", publish.payload.len());
                    if tx.send(publish.payload.to_vec()).await.is_err() {
                        info!("[Commands] Command channel closed");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[Commands] MQTT connection error: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}
