//! Prelude module for common re-exports.
//!
//! ```rust
//! use therm_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
pub use crate::loop_config::{AveragingConfig, DatasetConfig, LoopConfig};

// ─── Calibration ────────────────────────────────────────────────────
pub use crate::calibration::{
    BinId, CalibrationRecord, DatasetSource, PackedVersion, ProcessorVariant, VersionError,
};
pub use crate::meta_state::{MetaStateIndex, MetaStateRecord};

// ─── Fixed point ────────────────────────────────────────────────────
pub use crate::fixed::{ControlValue, SensorValue};

// ─── Collaborators ──────────────────────────────────────────────────
pub use crate::hw::{
    Actuator, CalibrationMemory, DiagnosticSnapshot, HwError, Platform, RunawayCause, Sensor,
};
