//! Collaborator traits: sensors, actuators, calibration memory, platform.
//!
//! The control loop never talks to device drivers directly. Drivers (real
//! or simulated) implement these traits and are handed to the loop at
//! construction time.
//!
//! # Timing
//!
//! All calls are synchronous and may block for a bounded hardware
//! transaction. A blocked call delays the calling loop only.

use serde::Serialize;
use thiserror::Error;

use crate::fixed::{ControlValue, SensorValue};

/// Error types for collaborator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    /// Device is not registered yet.
    #[error("device {0} not registered")]
    NotRegistered(u32),

    /// Bus transaction failed.
    #[error("bus transaction failed: {0}")]
    Transaction(String),

    /// Calibration memory read outside the image.
    #[error("calibration read out of range: offset {offset:#x}, len {len}")]
    OutOfRange {
        /// Requested offset.
        offset: u16,
        /// Requested length.
        len: usize,
    },

    /// Device rejected the requested target.
    #[error("target {0} rejected")]
    Rejected(ControlValue),
}

/// A temperature, voltage, current or power sensor.
pub trait Sensor: Send {
    /// Sensor identifier from the topology description.
    fn id(&self) -> u32;

    /// Whether the driver has registered with the platform.
    fn is_registered(&self) -> bool;

    /// Latest value known to the driver, without a bus transaction.
    fn current_value(&self) -> SensorValue;

    /// Read (or, for derived sensors, compute) a fresh value and cache it.
    fn fetch_current_value(&mut self) -> Result<SensorValue, HwError>;

    /// Force the hardware to refresh, then read and cache the value.
    fn force_and_fetch(&mut self) -> Result<SensorValue, HwError>;
}

/// A fan or pump actuator.
///
/// `target()` reports the last target accepted by `send_target`.
pub trait Actuator: Send {
    /// Actuator identifier from the topology description.
    fn id(&self) -> u32;

    /// Whether the driver has registered with the platform.
    fn is_registered(&self) -> bool;

    /// Last accepted target.
    fn target(&self) -> ControlValue;

    /// Program a new target. On success `target()` returns `value`.
    fn send_target(&mut self, value: ControlValue) -> Result<(), HwError>;
}

/// Per-processor calibration memory.
pub trait CalibrationMemory: Send + Sync {
    /// Fill `buf` from `offset` in the calibration memory of `processor_id`.
    fn read(&self, processor_id: u32, offset: u16, buf: &mut [u8]) -> Result<(), HwError>;
}

/// Host platform actions.
pub trait Platform: Send + Sync {
    /// Unconditionally put the host to sleep.
    fn request_sleep(&self);

    /// Record a diagnostic snapshot before a fail-safe action.
    fn dump_diagnostics(&self, snapshot: &DiagnosticSnapshot);
}

/// Why a loop declared thermal runaway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunawayCause {
    /// Instantaneous reading at or above the sleep/critical offset.
    CriticalOvershoot,
    /// Maximum cooling applied above T_max for too long.
    MaxCoolingTimeout,
}

/// State captured right before a sleep request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticSnapshot {
    pub loop_id: u32,
    pub processor_id: u32,
    pub cause: RunawayCause,
    /// Latest primary temperature, 16.16.
    pub temperature: SensorValue,
    /// Rolling average (equals `temperature` when averaging is off), 16.16.
    pub average_temperature: SensorValue,
    /// Configured T_max, 16.16.
    pub input_max: SensorValue,
    pub primary_target: ControlValue,
    pub seconds_at_max_cooling: u32,
}
