//! Meta-state records: candidate parameter sets a loop can run under.
//!
//! Every field is optional so a record can describe either an output
//! override (interval + override value) or a full PID parameter set. The
//! control loop decides at cache time whether a record is usable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fixed::{ControlValue, SensorValue};

/// Candidate meta-state as read from configuration or calibration.
///
/// TOML example (temperatures and powers in 16.16, gains in 12.20):
///
/// ```toml
/// interval = 1
/// g_p = 0x0010_0000
/// g_d = 0
/// g_r = 0x0000_8000
/// input_target = 0x0046_0000
/// input_max = 0x004B_0000
/// output_min = 300
/// output_max = 4000
/// max_power = 0x0050_0000
/// power_adjustment = 0x0005_0000
/// history_len = 10
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaStateRecord {
    /// Control interval [s], 1..=300.
    #[serde(default)]
    pub interval: Option<u32>,
    /// Fixed actuator target that bypasses the PID algorithm.
    #[serde(default)]
    pub output_override: Option<ControlValue>,
    #[serde(default)]
    pub g_p: Option<i32>,
    #[serde(default)]
    pub g_d: Option<i32>,
    #[serde(default)]
    pub g_r: Option<i32>,
    #[serde(default)]
    pub input_target: Option<SensorValue>,
    #[serde(default)]
    pub input_max: Option<SensorValue>,
    #[serde(default)]
    pub output_min: Option<ControlValue>,
    #[serde(default)]
    pub output_max: Option<ControlValue>,
    #[serde(default)]
    pub max_power: Option<SensorValue>,
    #[serde(default)]
    pub power_adjustment: Option<SensorValue>,
    #[serde(default)]
    pub history_len: Option<u32>,
}

impl MetaStateRecord {
    /// Override-only record.
    pub fn override_output(interval: u32, value: ControlValue) -> Self {
        Self {
            interval: Some(interval),
            output_override: Some(value),
            ..Default::default()
        }
    }
}

/// Which meta-state slot governs a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaStateIndex {
    /// Slot 0: selected calibration dataset.
    Normal,
    /// Slot 1: overtemp / uncalibrated parameters.
    Overtemp,
    /// Operator-forced parameters.
    Forced,
}

impl MetaStateIndex {
    /// Wire value reported to collaborators (forced is all-ones).
    #[inline]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Overtemp => 1,
            Self::Forced => 0xFFFF_FFFF,
        }
    }
}

impl fmt::Display for MetaStateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Overtemp => f.write_str("overtemp"),
            Self::Forced => f.write_str("forced"),
        }
    }
}
