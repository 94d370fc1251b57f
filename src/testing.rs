//! Recording fakes for every orchestrator collaborator.

use crate::error::{CaptureError, DispatchError, InfrastructureError, UploadError};
use crate::evidence::{CaptureDevice, EvidenceRecorder, Remuxer, ScratchArea};
use crate::model::{DoorState, Identity, NotificationMessage, PersistedState};
use crate::notify::NotificationDispatcher;
use crate::orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
use crate::store::memory::MemoryStore;
use crate::telemetry::TelemetryBus;
use crate::upload::Uploader;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

pub const USER: &str = "2U0LR6A8LER430Tq4tmdfAdl4iu2";

#[derive(Default)]
pub struct FakeCamera {
    pub calls: AtomicU32,
    pub fail: AtomicBool,
}

#[async_trait]
impl CaptureDevice for FakeCamera {
    async fn record(&self, path: &Path, _duration: Duration) -> Result<(), CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CaptureError::Command {
                program: "camera".into(),
                status: "exit status: 1".into(),
                stderr: "no camera".into(),
            });
        }
        tokio::fs::write(path, b"h264").await?;
        Ok(())
    }
}

pub struct CopyRemuxer;

#[async_trait]
impl Remuxer for CopyRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), CaptureError> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: Mutex<Vec<(String, PathBuf, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        identity: &Identity,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError> {
        assert!(local_path.exists(), "clip must exist while uploading");
        self.uploads.lock().push((
            identity.to_string(),
            local_path.to_path_buf(),
            content_type.to_string(),
        ));
        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Io(std::io::Error::other("bucket offline")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDispatcher {
    pub sent: Mutex<Vec<NotificationMessage>>,
    pub reject: AtomicBool,
}

#[async_trait]
impl NotificationDispatcher for FakeDispatcher {
    async fn send(&self, message: &NotificationMessage) -> Result<(), DispatchError> {
        self.sent.lock().push(message.clone());
        if self.reject.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBus {
    pub published: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl TelemetryBus for FakeBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, InfrastructureError> {
        let mut published = self.published.lock();
        published.push((topic.to_string(), serde_json::from_slice(&payload)?));
        Ok(published.len().to_string())
    }
}

/// An orchestrator wired to fakes, with a private scratch directory.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
    pub camera: Arc<FakeCamera>,
    pub uploader: Arc<FakeUploader>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub bus: Arc<FakeBus>,
    pub scratch_dir: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        let scratch_dir =
            std::env::temp_dir().join(format!("sensor-gateway-orch-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&scratch_dir).unwrap();

        let store = Arc::new(MemoryStore::new());
        let camera = Arc::new(FakeCamera::default());
        let uploader = Arc::new(FakeUploader::default());
        let dispatcher = Arc::new(FakeDispatcher::default());
        let bus = Arc::new(FakeBus::default());
        let recorder = Arc::new(EvidenceRecorder::new(
            ScratchArea::new(&scratch_dir),
            camera.clone(),
            Arc::new(CopyRemuxer),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators {
                store: store.clone(),
                tokens: store.clone(),
                dispatcher: dispatcher.clone(),
                recorder,
                uploader: uploader.clone(),
                bus: bus.clone(),
            },
            OrchestratorSettings {
                telemetry_topic: "sensor-data".into(),
            },
        ));

        Self {
            orchestrator,
            store,
            camera,
            uploader,
            dispatcher,
            bus,
            scratch_dir,
        }
    }

    pub fn identity() -> Identity {
        USER.parse().unwrap()
    }

    /// Prior state and a notification token already registered.
    pub fn seeded(state: DoorState) -> Self {
        let harness = Self::new();
        harness
            .store
            .seed(PersistedState::new(Self::identity(), state, None));
        harness.store.set_token(&Self::identity(), "device-token");
        harness
    }

    pub fn captures(&self) -> u32 {
        self.camera.calls.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> Vec<NotificationMessage> {
        self.dispatcher.sent.lock().clone()
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(&self.scratch_dir).unwrap().next().is_none()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.scratch_dir);
    }
}
