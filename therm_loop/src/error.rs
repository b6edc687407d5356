//! Error types for the control-loop engine.

use thiserror::Error;

use therm_common::calibration::VersionError;
use therm_common::hw::HwError;

/// Calibration dataset selection failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    /// No calibration memory is bound for the processor.
    #[error("no calibration data for processor {0}")]
    NoCalibrationData(u32),

    /// A calibration-memory field could not be read.
    #[error("calibration read of {field} failed: {source}")]
    CalibrationReadFailed {
        /// Field name from the calibration layout.
        field: &'static str,
        #[source]
        source: HwError,
    },

    /// Hardware and configuration versions are not comparable.
    #[error("dataset version comparison failed: {0}")]
    VersionComparisonFailed(#[from] VersionError),
}

/// Control-loop construction and runtime error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    /// Dataset selection failed.
    #[error("loop {loop_id}: {source}")]
    Dataset {
        loop_id: u32,
        #[source]
        source: DatasetError,
    },

    /// A device handed to the loop does not carry the configured id.
    #[error("loop {loop_id}: {role} expected id {expected}, got {actual}")]
    DeviceMismatch {
        loop_id: u32,
        role: &'static str,
        expected: u32,
        actual: u32,
    },

    /// Neither the overtemp, forced nor normal meta-state could be cached.
    #[error("loop {0}: no valid meta-state")]
    NoValidMetaState(u32),

    /// Two loops share an identifier inside one group.
    #[error("duplicate loop id {0}")]
    DuplicateLoop(u32),
}
