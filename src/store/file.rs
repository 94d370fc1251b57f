//! JSON document store on the local filesystem.
//!
//! Layout under the root directory:
//! - `sensors/<identity>.json` holds the [`PersistedState`]
//! - `fcmTokens/<identity>.json` holds `{"token": "..."}`
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never observes a half-written document.

use super::{SENSORS_COLLECTION, StateStore, TOKENS_COLLECTION, TokenResolver};
use crate::error::InfrastructureError;
use crate::model::{Identity, PersistedState};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

#[derive(Debug, Serialize, Deserialize)]
struct TokenDocument {
    token: String,
}

pub struct FileStore {
    root: PathBuf,
    session: OnceCell<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            session: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, collection: &str, identity: &Identity) -> PathBuf {
        self.root
            .join(collection)
            .join(format!("{}.json", identity.as_str()))
    }

    /// Register the push token for an identity (enrollment).
    pub async fn put_token(
        &self,
        identity: &Identity,
        token: &str,
    ) -> Result<(), InfrastructureError> {
        self.connect().await?;
        let doc = TokenDocument {
            token: token.to_string(),
        };
        write_document(&self.document_path(TOKENS_COLLECTION, identity), &doc).await
    }
}

async fn read_document<T: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<Option<T>, InfrastructureError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), InfrastructureError> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    debug!("Wrote {}", path.display());
    Ok(())
}

#[async_trait]
impl StateStore for FileStore {
    async fn connect(&self) -> Result<(), InfrastructureError> {
        self.session
            .get_or_try_init(|| async {
                for collection in [SENSORS_COLLECTION, TOKENS_COLLECTION] {
                    tokio::fs::create_dir_all(self.root.join(collection)).await?;
                }
                info!("Document store ready at {}", self.root.display());
                Ok::<(), InfrastructureError>(())
            })
            .await
            .map(|_| ())
    }

    async fn get(
        &self,
        identity: &Identity,
    ) -> Result<Option<PersistedState>, InfrastructureError> {
        read_document(&self.document_path(SENSORS_COLLECTION, identity)).await
    }

    async fn put(&self, state: &PersistedState) -> Result<(), InfrastructureError> {
        write_document(
            &self.document_path(SENSORS_COLLECTION, &state.identity),
            state,
        )
        .await
    }
}

#[async_trait]
impl TokenResolver for FileStore {
    async fn notification_token(
        &self,
        identity: &Identity,
    ) -> Result<Option<String>, InfrastructureError> {
        let doc: Option<TokenDocument> =
            read_document(&self.document_path(TOKENS_COLLECTION, identity)).await?;
        Ok(doc.map(|d| d.token))
    }
}
