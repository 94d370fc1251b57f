//! Sensor sources feeding the gateway loop.
//!
//! A source reports the door contact level and a climate reading. Retries
//! and backoff belong to the source; callers only see the final outcome.

pub mod command;
pub mod simulation;

pub use command::CommandSensor;
pub use simulation::SimulatedSensor;

use crate::error::SensorError;
use crate::model::{DoorState, Reading};
use async_trait::async_trait;

#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn door_state(&self) -> Result<DoorState, SensorError>;

    /// Final reading after the source's own retries, `None` on failure.
    async fn reading(&self) -> Option<Reading>;
}
