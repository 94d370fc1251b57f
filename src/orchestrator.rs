//! State-change detection and notification dispatch.
//!
//! Given a new observation the orchestrator decides whether the door state
//! changed, and if so captures evidence (on open), persists the new snapshot
//! and notifies the user. Every downstream failure is mapped to an
//! [`OrchestratorError`] so callers can tell validation failures, aborted
//! runs and "recorded but not notified" outcomes apart.
//!
//! | From      | To     | Effect                          |
//! |-----------|--------|---------------------------------|
//! | any       | OPEN   | capture + upload + persist + notify |
//! | any       | CLOSED | persist + notify                |
//! | X         | X      | nothing, unless `force_notify`  |

use crate::error::{InfrastructureError, OrchestratorError, Result};
use crate::evidence::{CLIP_CONTENT_TYPE, EvidenceRecorder};
use crate::lock::IdentityLocks;
use crate::model::{DoorState, Identity, NotificationMessage, PersistedState, Reading};
use crate::notify::NotificationDispatcher;
use crate::store::{SENSORS_COLLECTION, StateStore, TOKENS_COLLECTION, TokenResolver};
use crate::telemetry::TelemetryBus;
use crate::upload::Uploader;
use crate::validate;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Already-constructed collaborator handles.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub tokens: Arc<dyn TokenResolver>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub recorder: Arc<EvidenceRecorder>,
    pub uploader: Arc<dyn Uploader>,
    pub bus: Arc<dyn TelemetryBus>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub telemetry_topic: String,
}

/// Event emitted on the telemetry bus for each published reading.
#[derive(Debug, Serialize)]
struct TelemetryEvent<'a> {
    user: &'a str,
    temp_f: f64,
    humidity: f64,
    /// Fractional Unix seconds.
    timestamp: f64,
}

pub struct Orchestrator {
    deps: Collaborators,
    settings: OrchestratorSettings,
    locks: IdentityLocks,
}

impl Orchestrator {
    pub fn new(deps: Collaborators, settings: OrchestratorSettings) -> Self {
        Self {
            deps,
            settings,
            locks: IdentityLocks::new(),
        }
    }

    /// Record a door observation and notify the user if it is a change.
    ///
    /// Without a reading this only validates its inputs. `force_notify`
    /// re-captures evidence and re-notifies even when nothing changed, so
    /// every forced call triggers the camera.
    pub async fn update_state_and_notify(
        &self,
        identity: &str,
        requested_state: &str,
        reading: Option<Reading>,
        force_notify: bool,
    ) -> Result<()> {
        info!(
            "update_state_and_notify called: user={:?}, state={:?}, reading={:?}, force={}",
            identity, requested_state, reading, force_notify
        );

        let identity: Identity = identity.parse()?;
        let requested = validate::validate_state(requested_state)?;
        let Some(reading) = reading else {
            info!("Identity and state valid; no temp/humidity provided, skipping update");
            return Ok(());
        };
        reading.validate()?;

        let _guard = self.locks.acquire(&identity).await;
        let current = self.load_current(&identity).await?;

        if requested == current.state && !force_notify {
            info!("State unchanged; skipping update and notification");
            return Ok(());
        }

        if requested == DoorState::Open {
            info!("State changed to 'open'; capturing video");
            self.capture_and_upload(&identity).await;
        }

        if force_notify {
            info!("Force notify is set; updating state and sending notification");
        } else {
            info!(
                "State changed from {:?} to {:?}; updating state and sending notification",
                current.state.to_string(),
                requested.to_string()
            );
        }

        let next = PersistedState::new(identity.clone(), requested, Some(reading));
        self.deps
            .store
            .put(&next)
            .await
            .map_err(OrchestratorError::infrastructure)?;

        let token = self.resolve_token(&identity).await?;
        let message = NotificationMessage::door_update(token, requested, &reading);
        self.deps.dispatcher.send(&message).await.map_err(|e| {
            error!("State for {} recorded but notification failed: {}", identity, e);
            OrchestratorError::from(e)
        })?;

        Ok(())
    }

    /// Run [`Self::update_state_and_notify`] on its own task.
    pub fn spawn_update_state_and_notify(
        self: &Arc<Self>,
        identity: String,
        requested_state: DoorState,
        reading: Option<Reading>,
        force_notify: bool,
    ) -> JoinHandle<Result<()>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.update_state_and_notify(
                &identity,
                &requested_state.to_string(),
                reading,
                force_notify,
            )
            .await
        })
    }

    /// Replace the stored reading, keeping the stored door state.
    pub async fn update_reading(
        &self,
        identity: &str,
        temperature_f: f64,
        humidity_pct: f64,
    ) -> Result<()> {
        let identity: Identity = identity.parse()?;
        let reading = Reading::new(temperature_f, humidity_pct);
        reading.validate()?;

        let _guard = self.locks.acquire(&identity).await;
        let current = self.load_current(&identity).await?;

        let next = PersistedState::new(identity, current.state, Some(reading));
        self.deps
            .store
            .put(&next)
            .await
            .map_err(OrchestratorError::infrastructure)?;
        info!(
            "Reading updated for {}: {:.1}\u{00B0}F, {:.1}%",
            next.identity, temperature_f, humidity_pct
        );
        Ok(())
    }

    /// Mark the identity online with the observed door state.
    ///
    /// Neither captures nor notifies. Without a reading the stored one is
    /// kept.
    pub async fn record_status(
        &self,
        identity: &str,
        state: DoorState,
        reading: Option<Reading>,
    ) -> Result<()> {
        let identity: Identity = identity.parse()?;
        if let Some(reading) = &reading {
            reading.validate()?;
        }

        let _guard = self.locks.acquire(&identity).await;
        let current = self.load_current(&identity).await?;

        let next = PersistedState::new(identity, state, reading.or(current.reading));
        self.deps
            .store
            .put(&next)
            .await
            .map_err(OrchestratorError::infrastructure)?;
        info!("Status for {} updated to current: {}", next.identity, state);
        Ok(())
    }

    /// Publish a timestamped reading to the telemetry bus and wait for the ack.
    ///
    /// Independent of the state store. Returns the bus message id.
    pub async fn publish_reading(
        &self,
        identity: &str,
        temperature_f: f64,
        humidity_pct: f64,
    ) -> Result<String> {
        info!(
            "publish_reading called: user={:?}, temp={}, humidity={}",
            identity, temperature_f, humidity_pct
        );
        let identity: Identity = identity.parse()?;
        let reading = Reading::new(temperature_f, humidity_pct);
        reading.validate()?;

        let event = TelemetryEvent {
            user: identity.as_str(),
            temp_f: reading.temperature_f,
            humidity: reading.humidity_pct,
            timestamp: reading.observed_at.timestamp_micros() as f64 / 1_000_000.0,
        };
        let payload = serde_json::to_vec(&event)
            .map_err(|e| OrchestratorError::infrastructure(e.into()))?;

        let topic = &self.settings.telemetry_topic;
        let message_id = self
            .deps
            .bus
            .publish(topic, payload)
            .await
            .map_err(OrchestratorError::infrastructure)?;
        info!("Published message with ID: {} to topic: {}", message_id, topic);
        Ok(message_id)
    }

    /// Ensure the store session, then read the latest snapshot.
    ///
    /// A missing snapshot is an error, never an implicit change.
    async fn load_current(&self, identity: &Identity) -> Result<PersistedState> {
        let store = &self.deps.store;
        store
            .connect()
            .await
            .map_err(OrchestratorError::infrastructure)?;
        store
            .get(identity)
            .await
            .map_err(OrchestratorError::infrastructure)?
            .ok_or_else(|| {
                OrchestratorError::infrastructure(InfrastructureError::NotFound {
                    collection: SENSORS_COLLECTION,
                    identity: identity.to_string(),
                })
            })
    }

    async fn resolve_token(&self, identity: &Identity) -> Result<String> {
        self.deps
            .tokens
            .notification_token(identity)
            .await
            .map_err(OrchestratorError::infrastructure_after_write)?
            .ok_or_else(|| {
                OrchestratorError::infrastructure_after_write(InfrastructureError::NotFound {
                    collection: TOKENS_COLLECTION,
                    identity: identity.to_string(),
                })
            })
    }

    /// Best effort: failures are logged and the workflow carries on.
    async fn capture_and_upload(&self, identity: &Identity) {
        let clip = match self.deps.recorder.capture().await {
            Ok(clip) => clip,
            Err(e) => {
                warn!("[Capture] Video capture failed (continuing): {}", e);
                return;
            }
        };
        info!("Captured video to {}", clip.local_path().display());

        if let Err(e) = self
            .deps
            .uploader
            .upload(identity, clip.local_path(), CLIP_CONTENT_TYPE)
            .await
        {
            warn!("[Upload] Video upload failed (continuing): {}", e);
        }
    }
}
