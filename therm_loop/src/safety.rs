//! Thermal safety monitor root.
//!
//! One strategy per processor family, chosen once from the calibration
//! variant byte. Both run before the PID engine every interval, may flip
//! the loop's internal-overtemp flag in the shared environment and may
//! declare thermal runaway.

pub mod averaging;
pub mod critical;

use therm_common::calibration::ProcessorVariant;
use therm_common::fixed::{ControlValue, SensorValue};
use therm_common::hw::RunawayCause;
use therm_common::loop_config::AveragingConfig;

use crate::env::Environment;

pub use averaging::AveragingMonitor;
pub use critical::CriticalMonitor;

/// Readings and limits for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyContext {
    /// Owner id in the environment.
    pub loop_id: u32,
    /// Latest primary temperature, 16.16.
    pub latest: SensorValue,
    /// Rolling average (equals `latest` without averaging), 16.16.
    pub average: SensorValue,
    /// T_max, 16.16.
    pub input_max: SensorValue,
    pub primary_target: ControlValue,
    /// Output maximum of the last full parameter set.
    pub output_max: Option<ControlValue>,
    pub interval_sec: u32,
}

impl SafetyContext {
    /// Whether the primary actuator is already commanded to maximum cooling.
    #[inline]
    pub fn at_max_cooling(&self) -> bool {
        self.output_max.is_some_and(|max| self.primary_target >= max)
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyVerdict {
    /// The loop's internal-overtemp flag changed.
    pub env_changed: bool,
    /// Newly detected runaway. Reported once per crossing.
    pub runaway: Option<RunawayCause>,
}

/// Variant-specific overtemp hysteresis and runaway detection.
pub trait SafetyMonitor: Send {
    fn variant(&self) -> ProcessorVariant;

    /// Evaluate inside an environment transaction.
    fn evaluate(&mut self, ctx: &SafetyContext, env: &mut Environment) -> SafetyVerdict;

    /// Consume one pending interval of forced full cooling.
    fn take_force_full_cooling(&mut self) -> bool {
        false
    }

    /// Accumulated seconds at maximum cooling above T_max.
    fn seconds_at_max_cooling(&self) -> u32 {
        0
    }

    /// Start a new runaway episode (after a host wake).
    fn rearm(&mut self);
}

/// Edge detector so runaway fires once per crossing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunawayLatch {
    fired: bool,
}

impl RunawayLatch {
    /// Returns `cause` only on the first evaluation where it is present.
    pub fn edge(&mut self, cause: Option<RunawayCause>) -> Option<RunawayCause> {
        match cause {
            Some(c) if !self.fired => {
                self.fired = true;
                Some(c)
            }
            Some(_) => None,
            None => {
                self.fired = false;
                None
            }
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.fired = false;
    }
}

/// Build the monitor for a processor variant.
pub fn monitor_for(variant: ProcessorVariant, averaging: &AveragingConfig) -> Box<dyn SafetyMonitor> {
    match variant {
        ProcessorVariant::Averaging => Box::new(AveragingMonitor::new(*averaging)),
        ProcessorVariant::Critical => Box::new(CriticalMonitor::new()),
    }
}
