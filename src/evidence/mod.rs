//! Video evidence captured when a door opens.
//!
//! A capture records a raw H.264 stream to the scratch area, remuxes it to
//! MP4 without re-encoding and hands back an [`EvidenceClip`]. The raw file is
//! removed as soon as remux finishes (or fails) and the clip file is removed
//! when the clip is dropped.

pub mod command;
pub mod scratch;

pub use command::{CommandCapture, FfmpegRemuxer};
pub use scratch::{ClipSlot, ScratchArea, ScratchFile};

use crate::error::CaptureError;
use async_trait::async_trait;
use log::info;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Content type of finalized clips.
pub const CLIP_CONTENT_TYPE: &str = "video/mp4";

/// Records a fixed-duration clip to `path`.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn record(&self, path: &Path, duration: Duration) -> Result<(), CaptureError>;
}

/// Rewraps `input` into the delivery container at `output` without re-encoding.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), CaptureError>;
}

/// A finalized clip living in the scratch area for the duration of one call.
pub struct EvidenceClip {
    file: ScratchFile,
    duration: Duration,
    _slot: ClipSlot,
}

impl EvidenceClip {
    pub fn local_path(&self) -> &Path {
        self.file.path()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Capture + remux pipeline bound to a scratch area.
pub struct EvidenceRecorder {
    scratch: ScratchArea,
    device: Arc<dyn CaptureDevice>,
    remuxer: Arc<dyn Remuxer>,
    duration: Duration,
    timeout: Duration,
}

impl EvidenceRecorder {
    pub fn new(
        scratch: ScratchArea,
        device: Arc<dyn CaptureDevice>,
        remuxer: Arc<dyn Remuxer>,
        duration: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            scratch,
            device,
            remuxer,
            duration,
            timeout,
        }
    }

    pub fn scratch(&self) -> &ScratchArea {
        &self.scratch
    }

    /// Purge stale clips, then record and finalize a new one.
    ///
    /// Each external step is bounded by the configured timeout; an overrun is
    /// reported as [`CaptureError::Timeout`].
    pub async fn capture(&self) -> Result<EvidenceClip, CaptureError> {
        let purged = self.scratch.purge_stale().await;
        if purged > 0 {
            info!("[Capture] Purged {} stale clip(s)", purged);
        }

        let slot = self.scratch.reserve();
        let raw = slot.file("h264");
        let mp4 = slot.file("mp4");

        with_timeout(self.timeout, self.device.record(raw.path(), self.duration)).await?;
        info!("[Capture] Recorded {}", raw.path().display());

        let remuxed = with_timeout(self.timeout, self.remuxer.remux(raw.path(), mp4.path())).await;
        drop(raw);
        remuxed?;
        info!("[Capture] Remuxed video to {}", mp4.path().display());

        Ok(EvidenceClip {
            file: mp4,
            duration: self.duration,
            _slot: slot,
        })
    }
}

async fn with_timeout<F>(limit: Duration, step: F) -> Result<(), CaptureError>
where
    F: Future<Output = Result<(), CaptureError>>,
{
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| CaptureError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    struct FileWritingDevice {
        recorded: Mutex<Vec<PathBuf>>,
        hang: bool,
    }

    #[async_trait]
    impl CaptureDevice for FileWritingDevice {
        async fn record(&self, path: &Path, _duration: Duration) -> Result<(), CaptureError> {
            self.recorded.lock().push(path.to_path_buf());
            tokio::fs::write(path, b"raw").await?;
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }
    }

    struct CopyRemuxer {
        fail: bool,
    }

    #[async_trait]
    impl Remuxer for CopyRemuxer {
        async fn remux(&self, input: &Path, output: &Path) -> Result<(), CaptureError> {
            // A failing remuxer may still leave a partial output behind.
            tokio::fs::copy(input, output).await?;
            if self.fail {
                return Err(CaptureError::Command {
                    program: "ffmpeg".into(),
                    status: "exit status: 1".into(),
                    stderr: "bad stream".into(),
                });
            }
            Ok(())
        }
    }

    fn recorder(
        hang: bool,
        fail_remux: bool,
    ) -> (EvidenceRecorder, Arc<FileWritingDevice>, PathBuf) {
        let dir = std::env::temp_dir()
            .join(format!("sensor-gateway-evidence-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let device = Arc::new(FileWritingDevice {
            recorded: Mutex::new(Vec::new()),
            hang,
        });
        let recorder = EvidenceRecorder::new(
            ScratchArea::new(&dir),
            device.clone(),
            Arc::new(CopyRemuxer { fail: fail_remux }),
            Duration::from_secs(5),
            Duration::from_millis(200),
        );
        (recorder, device, dir)
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_capture_leaves_only_the_clip_until_dropped() {
        let (recorder, device, dir) = recorder(false, false);
        let clip = recorder.capture().await.unwrap();

        assert_eq!(clip.local_path().extension().unwrap(), "mp4");
        assert!(clip.local_path().exists());
        assert_eq!(clip.duration(), Duration::from_secs(5));
        assert!(!device.recorded.lock()[0].exists(), "raw h264 should be gone");

        drop(clip);
        assert!(dir_is_empty(&dir));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_remux_failure_cleans_up_both_files() {
        let (recorder, _device, dir) = recorder(false, true);
        let err = recorder.capture().await.err().unwrap();
        assert!(matches!(err, CaptureError::Command { .. }));
        assert!(dir_is_empty(&dir));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_capture_overrun_is_a_timeout() {
        let (recorder, _device, dir) = recorder(true, false);
        let err = recorder.capture().await.err().unwrap();
        assert!(matches!(err, CaptureError::Timeout(_)));
        assert!(dir_is_empty(&dir));
        let _ = std::fs::remove_dir_all(dir);
    }
}
