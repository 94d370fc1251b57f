//! Sensor event gateway library.
//!
//! Reads a door contact and a climate sensor, decides whether an observation
//! is a state change, and if so records it, captures evidence and notifies
//! the registered user.

pub mod commands;
pub mod config;
pub mod error;
pub mod evidence;
pub mod gateway;
pub mod lock;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod sensors;
pub mod store;
pub mod telemetry;
pub mod upload;
pub mod validate;

#[cfg(test)]
mod testing;
