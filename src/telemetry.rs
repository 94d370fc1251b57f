//! Telemetry publishing for time-series consumers.

use crate::config::MqttConfig;
use crate::error::InfrastructureError;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Publishes one event and returns the bus-assigned message id once the
/// broker has acknowledged it.
#[async_trait]
pub trait TelemetryBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, InfrastructureError>;
}

/// Delivery progress reported by the event loop driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent(u16),
    Acked(u16),
}

/// QoS 1 publisher over MQTT.
///
/// Publishes are serialized. The event loop sends queued publishes in order,
/// so a publish owns the first outgoing packet that is not claimed by an
/// earlier publish, even one that already timed out.
pub struct MqttTelemetry {
    client: AsyncClient,
    deliveries: Mutex<DeliveryLog>,
    publish_timeout: Duration,
    driver: JoinHandle<()>,
}

/// Delivery events plus the number of enqueued publishes whose outgoing
/// packet has not been reported yet.
struct DeliveryLog {
    rx: mpsc::Receiver<Delivery>,
    unsent: usize,
}

impl DeliveryLog {
    fn new(rx: mpsc::Receiver<Delivery>) -> Self {
        Self { rx, unsent: 0 }
    }

    /// Wait for the ack of the most recently enqueued publish.
    ///
    /// Sends belonging to earlier publishes are consumed first. Acks for any
    /// other packet id are ignored.
    async fn await_ack(&mut self) -> Result<u16, InfrastructureError> {
        let mut ours = None;
        while let Some(delivery) = self.rx.recv().await {
            match delivery {
                Delivery::Sent(pkid) if self.unsent > 0 => {
                    self.unsent -= 1;
                    if self.unsent == 0 {
                        ours = Some(pkid);
                    } else {
                        debug!("[Telemetry] Skipping late send {}", pkid);
                    }
                }
                Delivery::Sent(pkid) => debug!("[Telemetry] Ignoring resend {}", pkid),
                Delivery::Acked(pkid) if ours == Some(pkid) => return Ok(pkid),
                Delivery::Acked(pkid) => debug!("[Telemetry] Ignoring stale ack {}", pkid),
            }
        }
        Err(InfrastructureError::Unavailable(
            "MQTT event loop stopped".to_string(),
        ))
    }
}

impl MqttTelemetry {
    /// Create the client and spawn its event loop on the current runtime.
    pub fn connect(config: &MqttConfig) -> Self {
        let options = mqtt_options(config, &config.client_id);
        let (client, event_loop) = AsyncClient::new(options, 100);
        let (tx, rx) = mpsc::channel(64);
        let driver = tokio::spawn(drive(event_loop, tx));

        info!(
            "[Telemetry] MQTT client for {}:{} started",
            config.broker_host, config.broker_port
        );

        Self {
            client,
            deliveries: Mutex::new(DeliveryLog::new(rx)),
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
            driver,
        }
    }
}

impl Drop for MqttTelemetry {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl TelemetryBus for MqttTelemetry {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, InfrastructureError> {
        let mut deliveries = self.deliveries.lock().await;

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| InfrastructureError::Unavailable(e.to_string()))?;
        deliveries.unsent += 1;

        let pkid = tokio::time::timeout(self.publish_timeout, deliveries.await_ack())
            .await
            .map_err(|_| InfrastructureError::Timeout(self.publish_timeout))??;
        Ok(pkid.to_string())
    }
}

/// Broker connection options shared by every MQTT client of the gateway.
pub(crate) fn mqtt_options(config: &MqttConfig, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }
    options
}

/// Poll the event loop forever, reporting publish progress.
async fn drive(mut event_loop: EventLoop, tx: mpsc::Sender<Delivery>) {
    loop {
        match event_loop.poll().await {
            Ok(event) => {
                if let Some(delivery) = delivery_of(&event)
                    && tx.try_send(delivery).is_err()
                {
                    warn!("[Telemetry] Delivery backlog full, dropped {:?}", delivery);
                }
            }
            Err(e) => {
                error!("[Telemetry] MQTT connection error: {:?}", e);
                // Wait before reconnecting
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

fn delivery_of(event: &Event) -> Option<Delivery> {
    match event {
        Event::Outgoing(Outgoing::Publish(pkid)) => Some(Delivery::Sent(*pkid)),
        Event::Incoming(Packet::PubAck(ack)) => Some(Delivery::Acked(ack.pkid)),
        _ => None,
    }
}
