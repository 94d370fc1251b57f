//! Simulated sensor for development without hardware.

use super::SensorSource;
use crate::error::SensorError;
use crate::model::{DoorState, Reading};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

/// Door contact that can be toggled and a slowly drifting climate.
#[derive(Default)]
pub struct SimulatedSensor {
    open: AtomicBool,
    samples: AtomicU32,
}

impl SimulatedSensor {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
            samples: AtomicU32::new(0),
        }
    }

    /// Flip the door and return the new state.
    pub fn toggle(&self) -> DoorState {
        let was_open = self.open.fetch_xor(true, Ordering::SeqCst);
        state_of(!was_open)
    }
}

fn state_of(open: bool) -> DoorState {
    if open {
        DoorState::Open
    } else {
        DoorState::Closed
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn door_state(&self) -> Result<DoorState, SensorError> {
        Ok(state_of(self.open.load(Ordering::SeqCst)))
    }

    async fn reading(&self) -> Option<Reading> {
        let n = self.samples.fetch_add(1, Ordering::SeqCst);
        let temperature_f = 68.0 + f64::from(n % 10) * 0.5;
        let humidity_pct = 40.0 + f64::from(n % 5);
        Some(Reading::new(temperature_f, humidity_pct))
    }
}

/// Spawn a task that toggles the simulated door every `period`.
pub fn run_door_simulation(sensor: Arc<SimulatedSensor>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let state = sensor.toggle();
            info!("[Sim] Door toggled to: {}", state);
        }
    })
}
