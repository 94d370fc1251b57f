//! State store and notification token lookup.
//!
//! The orchestrator only ever reads the latest snapshot for an identity and
//! writes a complete replacement. Implementations never merge fields.

pub mod file;
#[cfg(test)]
pub mod memory;

pub use file::FileStore;

use crate::error::InfrastructureError;
use crate::model::{Identity, PersistedState};
use async_trait::async_trait;

/// Collection holding one [`PersistedState`] document per identity.
pub const SENSORS_COLLECTION: &str = "sensors";

/// Collection holding one notification token document per identity.
pub const TOKENS_COLLECTION: &str = "fcmTokens";

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Establish the session. Must be idempotent and cheap after the first call.
    async fn connect(&self) -> Result<(), InfrastructureError>;

    async fn get(&self, identity: &Identity)
    -> Result<Option<PersistedState>, InfrastructureError>;

    /// Replace the whole document for `state.identity`.
    async fn put(&self, state: &PersistedState) -> Result<(), InfrastructureError>;
}

#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn notification_token(
        &self,
        identity: &Identity,
    ) -> Result<Option<String>, InfrastructureError>;
}
