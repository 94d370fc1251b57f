//! Push notification delivery.

pub mod fcm;

pub use fcm::FcmDispatcher;

use crate::error::DispatchError;
use crate::model::NotificationMessage;
use async_trait::async_trait;

/// Delivers one message to one device. Anything but an accepted response is
/// an error.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), DispatchError>;
}
