//! Fixed-point incremental PID.
//!
//! The reset gain does not feed the output sum. It moves the temperature
//! ceiling away from `input_max` by the weighted sum of power errors
//! (`power_ceiling − power`), and the effective target is the lower of that
//! ceiling and `input_target`.

use therm_common::fixed::{
    gain_product, reduce_to_16_16, truncate_28_36, ControlValue, SensorValue,
};

use crate::history::{SampleHistory, TemperatureHistory};
use crate::meta::{ControlMode, FullParams, OutputBounds};

/// Per-cycle inputs of the PID computation.
#[derive(Debug, Clone, Copy)]
pub struct PidInputs<'a> {
    pub history: &'a SampleHistory,
    pub temperatures: &'a TemperatureHistory,
    /// Last target accepted by the primary actuator.
    pub current_target: ControlValue,
    pub interval_sec: u32,
    /// No derivative history yet: start from zero.
    pub first_adjustment: bool,
}

/// Intermediate terms of one PID evaluation, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PidTerms {
    pub adjusted_target: SensorValue,
    pub proportional: SensorValue,
    pub derivative: SensorValue,
    /// `(G_d·d + G_p·p) >> 36`.
    pub delta: i64,
}

/// Power-adjusted effective target: `min(target, max − (G_r·Σerr) >> 20)`.
#[inline]
pub fn adjusted_target(params: &FullParams, history: &SampleHistory) -> SensorValue {
    let reset = reduce_to_16_16(gain_product(params.g_r, history.error_sum()));
    let ceiling = params.input_max.wrapping_sub(reset);
    params.input_target.min(ceiling)
}

/// Temperature slope over one interval (truncating division).
#[inline]
pub fn derivative(temps: &TemperatureHistory, interval_sec: u32) -> SensorValue {
    let interval = interval_sec.max(1) as i32;
    temps.latest().wrapping_sub(temps.previous()) / interval
}

/// Evaluate the proportional and derivative terms.
pub fn pid_terms(params: &FullParams, inputs: &PidInputs<'_>) -> PidTerms {
    let adjusted = adjusted_target(params, inputs.history);
    let d = derivative(inputs.temperatures, inputs.interval_sec);
    let p = inputs.temperatures.latest().wrapping_sub(adjusted);
    let accum = gain_product(params.g_d, d).saturating_add(gain_product(params.g_p, p));
    PidTerms {
        adjusted_target: adjusted,
        proportional: p,
        derivative: d,
        delta: truncate_28_36(accum),
    }
}

/// Negative raw values become 0, then the output bounds apply.
#[inline]
pub fn clamp_output(raw: i64, bounds: OutputBounds) -> ControlValue {
    let non_negative = u32::try_from(raw.max(0)).unwrap_or(u32::MAX);
    bounds.clamp(non_negative)
}

/// Compute the next primary actuator target.
pub fn calculate_new_target(mode: &ControlMode, inputs: &PidInputs<'_>) -> ControlValue {
    let params = match mode {
        ControlMode::Override(value) => return *value,
        ControlMode::Full(params) => params,
    };

    let raw = if inputs.first_adjustment {
        0
    } else {
        inputs.current_target as i64 + pid_terms(params, inputs).delta
    };

    clamp_output(
        raw,
        OutputBounds {
            min: params.output_min,
            max: params.output_max,
        },
    )
}
