//! Evidence upload to object storage, keyed by identity.

use crate::error::UploadError;
use crate::model::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        identity: &Identity,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError>;
}

/// Object metadata stored next to each uploaded blob.
#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Bucket backed by a local directory.
///
/// Objects land at `<root>/videos/<identity>/<file name>` with a
/// `<file name>.meta.json` sidecar.
pub struct BucketUploader {
    root: PathBuf,
}

impl BucketUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_name(identity: &Identity, file_name: &str) -> String {
        format!("videos/{}/{}", identity, file_name)
    }
}

#[async_trait]
impl Uploader for BucketUploader {
    async fn upload(
        &self,
        identity: &Identity,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::InvalidPath(local_path.display().to_string()))?;

        let name = Self::object_name(identity, file_name);
        let target = self.root.join(&name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            "[Upload] Uploading video {:?} to bucket {} for user {}",
            file_name,
            self.root.display(),
            identity
        );
        let size = tokio::fs::copy(local_path, &target).await?;

        let meta = ObjectMetadata {
            name: name.clone(),
            content_type: content_type.to_string(),
            size,
            uploaded_at: Utc::now(),
        };
        let meta_path = self.root.join(format!("{name}.meta.json"));
        tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?).await?;

        info!(
            "[Upload] Upload complete: {} -> {} (size={} content_type={})",
            local_path.display(),
            target.display(),
            size,
            content_type
        );
        Ok(())
    }
}
