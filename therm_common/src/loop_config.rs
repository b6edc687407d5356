//! Typed per-loop topology and parameter configuration.
//!
//! One `LoopConfig` describes one CPU fan loop: which processor it cools,
//! which devices it drives, optional calibration overrides and the
//! overtemp/forced meta-states. Validated once at load time.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::calibration::{BinId, CalibrationRecord, DatasetSource, PackedVersion};
use crate::config::ConfigError;
use crate::consts::{
    DEFAULT_AVERAGE_SAMPLE_COUNT, DEFAULT_INTAKE_SCALING, DEFAULT_SLEEP_OFFSET,
    DEFAULT_SLEW_AVERAGE_OFFSET, DEFAULT_SLEW_OFFSET, ROM_INTERVAL_SEC,
};
use crate::fixed::{ControlValue, SensorValue};
use crate::meta_state::MetaStateRecord;

/// Index of each sensor in `LoopConfig::sensor_ids`.
pub mod sensor_slot {
    pub const TEMPERATURE: usize = 0;
    pub const VOLTAGE: usize = 1;
    pub const CURRENT: usize = 2;
    pub const POWER: usize = 3;
}

/// Index of each actuator in `LoopConfig::actuator_ids`.
pub mod actuator_slot {
    pub const PRIMARY: usize = 0;
    pub const SECONDARY: usize = 1;
}

/// Configuration of one CPU fan loop.
///
/// # TOML Example
///
/// ```toml
/// [[loops]]
/// loop_id = 1
/// processor_id = 0
/// actuator_ids = [16, 17]
/// sensor_ids = [1, 2, 3, 4]
/// intake_scaling = 0x0000_C000
///
/// [loops.overtemp]
/// interval = 1
/// output_override = 4000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    /// Unique loop identifier (also drives the first-deadline stagger).
    pub loop_id: u32,

    /// Processor whose calibration memory this loop reads.
    pub processor_id: u32,

    /// Free-form description for logs.
    #[serde(default)]
    pub description: String,

    /// `[primary, secondary]` actuator ids.
    pub actuator_ids: [u32; 2],

    /// `[temperature, voltage, current, power]` sensor ids.
    pub sensor_ids: [u32; 4],

    /// Secondary actuator scaling factor, 16.16 (default 1.0).
    #[serde(default = "default_intake_scaling")]
    pub intake_scaling: u32,

    /// Calibration overrides, matched by bin id.
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,

    /// Meta-state slot 1, used while any overtemp condition is active.
    #[serde(default)]
    pub overtemp: Option<MetaStateRecord>,

    /// Operator-forced meta-state.
    #[serde(default)]
    pub forced: Option<MetaStateRecord>,

    /// Averaging safety monitor tuning.
    #[serde(default)]
    pub averaging: AveragingConfig,
}

fn default_intake_scaling() -> u32 {
    DEFAULT_INTAKE_SCALING
}

impl LoopConfig {
    /// Validate structural constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actuator_ids[0] == self.actuator_ids[1] {
            return Err(ConfigError::ValidationError(format!(
                "loop {}: primary and secondary actuator share id {}",
                self.loop_id, self.actuator_ids[0]
            )));
        }

        let mut seen = HashSet::new();
        for id in self.sensor_ids {
            if !seen.insert(id) {
                return Err(ConfigError::ValidationError(format!(
                    "loop {}: duplicate sensor id {}",
                    self.loop_id, id
                )));
            }
        }

        if self.intake_scaling == 0 {
            return Err(ConfigError::ValidationError(format!(
                "loop {}: intake_scaling must be non-zero",
                self.loop_id
            )));
        }

        for (i, ds) in self.datasets.iter().enumerate() {
            ds.validate()
                .map_err(|e| ConfigError::ValidationError(format!(
                    "loop {} dataset[{i}]: {e}",
                    self.loop_id
                )))?;
        }

        self.averaging.validate().map_err(|e| {
            ConfigError::ValidationError(format!("loop {} averaging: {e}", self.loop_id))
        })?;

        Ok(())
    }

    /// Calibration overrides as records.
    pub fn dataset_records(&self) -> Vec<CalibrationRecord> {
        self.datasets.iter().map(DatasetConfig::to_record).collect()
    }
}

/// A configuration-supplied calibration dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// Bin id this dataset applies to.
    pub bin_id: BinId,
    /// Packed version; a dataset without one cannot be compared.
    #[serde(default)]
    pub version: Option<PackedVersion>,
    #[serde(default = "default_dataset_interval")]
    pub interval: u32,
    pub g_p: i32,
    pub g_d: i32,
    pub g_r: i32,
    pub input_target: SensorValue,
    pub input_max: SensorValue,
    pub output_min: ControlValue,
    pub output_max: ControlValue,
    pub history_len: u32,
    pub max_power: SensorValue,
    pub power_adjustment: SensorValue,
}

fn default_dataset_interval() -> u32 {
    ROM_INTERVAL_SEC
}

impl DatasetConfig {
    fn validate(&self) -> Result<(), String> {
        if self.bin_id.is_empty() {
            return Err("bin_id cannot be empty".to_string());
        }
        if self.output_min > self.output_max {
            return Err(format!(
                "output_min {} > output_max {}",
                self.output_min, self.output_max
            ));
        }
        Ok(())
    }

    pub fn to_record(&self) -> CalibrationRecord {
        CalibrationRecord {
            source: DatasetSource::Config,
            bin_id: self.bin_id.clone(),
            version: self.version,
            g_p: self.g_p,
            g_d: self.g_d,
            g_r: self.g_r,
            input_target: self.input_target,
            input_max: self.input_max,
            output_min: self.output_min,
            output_max: self.output_max,
            history_len: self.history_len,
            max_power: self.max_power,
            power_adjustment: self.power_adjustment,
            processor_variant: None,
            interval_sec: self.interval,
        }
    }
}

/// Averaging monitor tuning. Offsets are whole °C above T_max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AveragingConfig {
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    #[serde(default = "default_average_offset")]
    pub average_offset: i32,
    #[serde(default = "default_slew_offset")]
    pub slew_offset: i32,
    #[serde(default = "default_sleep_offset")]
    pub sleep_offset: i32,
}

fn default_sample_count() -> usize {
    DEFAULT_AVERAGE_SAMPLE_COUNT
}
fn default_average_offset() -> i32 {
    DEFAULT_SLEW_AVERAGE_OFFSET
}
fn default_slew_offset() -> i32 {
    DEFAULT_SLEW_OFFSET
}
fn default_sleep_offset() -> i32 {
    DEFAULT_SLEEP_OFFSET
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            sample_count: DEFAULT_AVERAGE_SAMPLE_COUNT,
            average_offset: DEFAULT_SLEW_AVERAGE_OFFSET,
            slew_offset: DEFAULT_SLEW_OFFSET,
            sleep_offset: DEFAULT_SLEEP_OFFSET,
        }
    }
}

impl AveragingConfig {
    fn validate(&self) -> Result<(), String> {
        if self.sleep_offset <= self.slew_offset || self.sleep_offset <= self.average_offset {
            return Err(format!(
                "sleep_offset {} must exceed slew_offset {} and average_offset {}",
                self.sleep_offset, self.slew_offset, self.average_offset
            ));
        }
        if !(-64..=64).contains(&self.sleep_offset) {
            return Err(format!("sleep_offset {} out of range [-64, 64]", self.sleep_offset));
        }
        Ok(())
    }
}
