//! Shared scratch directory for in-flight video clips.
//!
//! Every capture reserves a unique base name. Stale-file purges skip names
//! that are still reserved, so concurrent captures never delete each other's
//! files. Files are owned by [`ScratchFile`] guards and removed on drop.

use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prefix shared by every clip file in the scratch directory.
pub const CLIP_PREFIX: &str = "security-";

/// Extensions produced by capture (`h264`) and remux (`mp4`).
const CLIP_EXTENSIONS: [&str; 2] = ["h264", "mp4"];

#[derive(Clone)]
pub struct ScratchArea {
    dir: PathBuf,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ScratchArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a unique base name such as `security-20251130-163439-1a2b3c4d`.
    pub fn reserve(&self) -> ClipSlot {
        let stem = format!(
            "{}{}-{}",
            CLIP_PREFIX,
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        self.in_flight.lock().insert(stem.clone());
        ClipSlot {
            stem,
            dir: self.dir.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    /// Remove leftover clips from earlier runs. Best effort.
    ///
    /// Returns the number of files removed.
    pub async fn purge_stale(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "[Capture] Cannot scan scratch dir {}: {}",
                    self.dir.display(),
                    e
                );
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("[Capture] Scratch dir scan interrupted: {}", e);
                    break;
                }
            };

            let path = entry.path();
            let Some(stem) = stale_clip_stem(&path) else {
                continue;
            };
            if self.in_flight.lock().contains(stem) {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("[Capture] Purged stale clip {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "[Capture] Failed to remove old tmp file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        removed
    }
}

/// Stem of a file that looks like one of our clips.
fn stale_clip_stem(path: &Path) -> Option<&str> {
    let ext = path.extension()?.to_str()?;
    let stem = path.file_stem()?.to_str()?;
    (stem.starts_with(CLIP_PREFIX) && CLIP_EXTENSIONS.contains(&ext)).then_some(stem)
}

/// A reserved clip name. Released from the in-flight set on drop.
pub struct ClipSlot {
    stem: String,
    dir: PathBuf,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ClipSlot {
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Guarded path for the given extension inside the scratch directory.
    pub fn file(&self, extension: &str) -> ScratchFile {
        ScratchFile::new(self.dir.join(format!("{}.{}", self.stem, extension)))
    }
}

impl Drop for ClipSlot {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.stem);
    }
}

/// A scratch file removed when the guard drops, whatever the exit path.
///
/// Removal in `Drop` is a blocking unlink on the current thread, which may
/// be a runtime worker. Clips are single files in a local directory, so the
/// stall is brief.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("[Capture] Removed {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "[Capture] Failed to remove tmp file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_scratch() -> ScratchArea {
        let dir = std::env::temp_dir()
            .join(format!("sensor-gateway-scratch-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        ScratchArea::new(dir)
    }

    #[test]
    fn test_reserved_names_are_unique() {
        let scratch = temp_scratch();
        let a = scratch.reserve();
        let b = scratch.reserve();
        assert_ne!(a.stem(), b.stem());
        assert!(a.stem().starts_with(CLIP_PREFIX));
        let _ = std::fs::remove_dir_all(scratch.dir());
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let scratch = temp_scratch();
        let slot = scratch.reserve();
        let file = slot.file("mp4");
        std::fs::write(file.path(), b"clip").unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(scratch.dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scratch_file_removed_when_dropped_inside_task() {
        let scratch = temp_scratch();
        let slot = scratch.reserve();
        let file = slot.file("h264");
        tokio::fs::write(file.path(), b"raw").await.unwrap();
        let path = file.path().to_path_buf();

        tokio::spawn(async move { drop(file) }).await.unwrap();

        assert!(!path.exists());
        drop(slot);
        let _ = std::fs::remove_dir_all(scratch.dir());
    }

    #[tokio::test]
    async fn test_purge_skips_in_flight_and_foreign_files() {
        let scratch = temp_scratch();
        let dir = scratch.dir().to_path_buf();

        std::fs::write(dir.join("security-20200101-000000-deadbeef.mp4"), b"old").unwrap();
        std::fs::write(dir.join("security-20200101-000000-deadbeef.h264"), b"old").unwrap();
        std::fs::write(dir.join("security-notes.txt"), b"keep").unwrap();
        std::fs::write(dir.join("other.mp4"), b"keep").unwrap();

        let slot = scratch.reserve();
        let active = slot.file("h264");
        std::fs::write(active.path(), b"recording").unwrap();

        assert_eq!(scratch.purge_stale().await, 2);
        assert!(active.path().exists());
        assert!(dir.join("security-notes.txt").exists());
        assert!(dir.join("other.mp4").exists());

        drop(active);
        drop(slot);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_purge_missing_dir_is_harmless() {
        let dir = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
        let scratch = ScratchArea::new(dir);
        assert_eq!(scratch.purge_stale().await, 0);
    }
}
