//! Long-running loop tying a sensor source to the orchestrator.
//!
//! Polls the door contact, runs the state-change workflow whenever the level
//! changes (including once at startup), periodically refreshes the stored and
//! published reading, and raises a forced notification when the temperature
//! drops below the warning threshold. Remote refresh and status requests
//! arrive on an optional command channel.

use crate::commands::{CommandRequest, RemoteCommand};
use crate::config::SensorConfig;
use crate::model::{DoorState, Reading};
use crate::orchestrator::Orchestrator;
use crate::sensors::SensorSource;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub poll_interval: Duration,
    /// Refresh telemetry once every this many polls.
    pub telemetry_every: u32,
    pub low_temp_warning_f: f64,
    pub low_temp_cooldown: Duration,
    /// How old a remote command may be and still run.
    pub command_window: Duration,
}

impl From<&SensorConfig> for GatewaySettings {
    fn from(config: &SensorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            telemetry_every: config.telemetry_every.max(1),
            low_temp_warning_f: config.low_temp_warning_f,
            low_temp_cooldown: config.low_temp_cooldown(),
            command_window: config.command_window(),
        }
    }
}

pub struct Gateway {
    identity: String,
    source: Arc<dyn SensorSource>,
    orchestrator: Arc<Orchestrator>,
    settings: GatewaySettings,
    tasks: TaskTracker,
    commands: Option<mpsc::Receiver<Vec<u8>>>,
    last_door: Option<DoorState>,
    last_good: Option<Reading>,
    last_warning: Option<Instant>,
}

impl Gateway {
    pub fn new(
        identity: impl Into<String>,
        source: Arc<dyn SensorSource>,
        orchestrator: Arc<Orchestrator>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            identity: identity.into(),
            source,
            orchestrator,
            settings,
            tasks: TaskTracker::new(),
            commands: None,
            last_door: None,
            last_good: None,
            last_warning: None,
        }
    }

    /// Also serve JSON command requests received on `rx`.
    pub fn with_commands(mut self, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        self.commands = Some(rx);
        self
    }

    /// Run until `shutdown` is cancelled, then wait for in-flight workflows.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "[Gateway] Monitoring user {} every {:?}",
            self.identity, self.settings.poll_interval
        );
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u32 = 0;

        loop {
            let wake = tokio::select! {
                _ = shutdown.cancelled() => break,
                payload = next_command(&mut self.commands) => Wake::Command(payload),
                _ = ticker.tick() => Wake::Tick,
            };

            match wake {
                Wake::Command(Some(payload)) => {
                    self.handle_command(&payload).await;
                    continue;
                }
                Wake::Command(None) => {
                    info!("[Gateway] Command channel closed");
                    self.commands = None;
                    continue;
                }
                Wake::Tick => {}
            }

            self.poll_door().await;

            polls = polls.wrapping_add(1);
            if polls % self.settings.telemetry_every == 0 {
                self.refresh_telemetry().await;
            }
        }

        info!("[Gateway] Stopping; waiting for in-flight workflows");
        self.tasks.close();
        self.tasks.wait().await;
        info!("[Gateway] Stopped");
    }

    async fn poll_door(&mut self) {
        let door = match self.source.door_state().await {
            Ok(door) => door,
            Err(e) => {
                warn!("[Gateway] Door sensor read failed: {}", e);
                return;
            }
        };
        if self.last_door == Some(door) {
            return;
        }

        // The change stays pending until it can be recorded with a reading.
        let Some(reading) = self.current_reading().await else {
            warn!("[Gateway] No reading yet for door {}; retrying next poll", door);
            return;
        };

        match self.last_door {
            Some(previous) => info!("[Gateway] Door changed {} -> {}", previous, door),
            None => info!("[Gateway] Startup sync with door {}", door),
        }
        self.last_door = Some(door);
        self.start_workflow(door, Some(reading), false);
    }

    /// Fresh sample, or the last good one restamped when the sensor fails.
    async fn current_reading(&mut self) -> Option<Reading> {
        match self.source.reading().await {
            Some(reading) => {
                self.last_good = Some(reading);
                Some(reading)
            }
            None => {
                warn!("[Gateway] Reading failed, using previous temp/humidity");
                self.last_good.map(|r| Reading::new(r.temperature_f, r.humidity_pct))
            }
        }
    }

    async fn handle_command(&mut self, payload: &[u8]) {
        let request = match CommandRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("[Gateway] Malformed command request: {}", e);
                return;
            }
        };
        if !request.is_fresh(Utc::now(), self.settings.command_window) {
            warn!(
                "[Gateway] Ignoring command {} issued at {}: outside {:?} window",
                request.r_cmd, request.r_ts, self.settings.command_window
            );
            return;
        }

        match request.command() {
            RemoteCommand::Refresh => {
                info!("[Gateway] Refresh requested");
                let door = match self.source.door_state().await {
                    Ok(door) => door,
                    Err(e) => {
                        warn!("[Gateway] Door sensor read failed, refresh skipped: {}", e);
                        return;
                    }
                };
                let Some(reading) = self.current_reading().await else {
                    warn!("[Gateway] No reading available, refresh skipped");
                    return;
                };
                self.last_door = Some(door);
                self.start_workflow(door, Some(reading), true);
            }
            RemoteCommand::Status => {
                info!("[Gateway] Status requested");
                let door = match self.source.door_state().await {
                    Ok(door) => door,
                    Err(e) => {
                        warn!("[Gateway] Door sensor read failed, status skipped: {}", e);
                        return;
                    }
                };
                let reading = self.current_reading().await;

                let orchestrator = self.orchestrator.clone();
                let identity = self.identity.clone();
                self.tasks.spawn(async move {
                    if let Err(e) = orchestrator.record_status(&identity, door, reading).await {
                        error!("[Gateway] Status update failed: {}", e);
                    }
                });
            }
            RemoteCommand::Unknown(code) => info!("[Gateway] Unknown command received: {}", code),
        }
    }

    async fn refresh_telemetry(&mut self) {
        let Some(reading) = self.source.reading().await else {
            warn!("[Gateway] Reading failed, skipping telemetry refresh");
            return;
        };
        self.last_good = Some(reading);

        let orchestrator = self.orchestrator.clone();
        let identity = self.identity.clone();
        self.tasks.spawn(async move {
            if let Err(e) = orchestrator
                .update_reading(&identity, reading.temperature_f, reading.humidity_pct)
                .await
            {
                error!("[Gateway] update_reading failed: {}", e);
            }
            if let Err(e) = orchestrator
                .publish_reading(&identity, reading.temperature_f, reading.humidity_pct)
                .await
            {
                error!("[Gateway] publish_reading failed: {}", e);
            }
        });

        if self.low_temp_due(&reading) {
            warn!(
                "[Gateway] Temperature below warning {:.2}: {:.2} \u{00B0}F",
                self.settings.low_temp_warning_f, reading.temperature_f
            );
            self.last_warning = Some(Instant::now());
            if let Some(door) = self.last_door {
                self.start_workflow(door, Some(reading), true);
            }
        }
    }

    /// Below threshold and outside the cooldown window.
    fn low_temp_due(&self, reading: &Reading) -> bool {
        reading.temperature_f < self.settings.low_temp_warning_f
            && self
                .last_warning
                .is_none_or(|at| at.elapsed() >= self.settings.low_temp_cooldown)
    }

    fn start_workflow(&self, door: DoorState, reading: Option<Reading>, force_notify: bool) {
        let handle = self.orchestrator.spawn_update_state_and_notify(
            self.identity.clone(),
            door,
            reading,
            force_notify,
        );
        self.tasks.spawn(async move {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.state_recorded() => {
                    error!("[Gateway] State recorded but user not notified: {}", e)
                }
                Ok(Err(e)) => error!("[Gateway] State update failed: {}", e),
                Err(e) => error!("[Gateway] Workflow task panicked: {}", e),
            }
        });
    }
}

enum Wake {
    Tick,
    Command(Option<Vec<u8>>),
}

async fn next_command(commands: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
