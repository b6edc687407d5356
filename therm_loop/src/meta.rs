//! Meta-state cache: validated snapshot of the governing parameter set.
//!
//! `LiveControlState::cache` either commits a complete candidate or leaves
//! every field untouched.

use tracing::debug;

use therm_common::consts::{HISTORY_LEN_MIN, INTERVAL_SEC_MAX, INTERVAL_SEC_MIN};
use therm_common::fixed::{whole, ControlValue, SensorValue};
use therm_common::meta_state::{MetaStateIndex, MetaStateRecord};

use crate::history::SampleHistory;

/// Full PID parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullParams {
    /// 12.20 gains.
    pub g_p: i32,
    pub g_d: i32,
    pub g_r: i32,
    /// 16.16 temperatures.
    pub input_target: SensorValue,
    pub input_max: SensorValue,
    /// Power ceiling: max power − power adjustment, 16.16.
    pub power_max_adj: SensorValue,
    pub output_min: ControlValue,
    pub output_max: ControlValue,
}

/// Governing computation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Fixed actuator target, algorithm bypassed.
    Override(ControlValue),
    /// PID algorithm with the given parameters.
    Full(FullParams),
}

/// Output bounds of the most recent full-mode parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBounds {
    pub min: ControlValue,
    pub max: ControlValue,
}

impl OutputBounds {
    /// Clamp to `[min, max]`, testing the lower bound first.
    #[inline]
    pub fn clamp(self, value: ControlValue) -> ControlValue {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// Cached meta-state of one loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveControlState {
    mode: Option<ControlMode>,
    interval_sec: u32,
    /// Most recent full parameter set, kept while an override governs.
    last_full: Option<FullParams>,
    index: Option<MetaStateIndex>,
}

impl LiveControlState {
    #[inline]
    pub const fn mode(&self) -> Option<&ControlMode> {
        self.mode.as_ref()
    }

    /// Active full parameters, if the loop is in full mode.
    #[inline]
    pub const fn full(&self) -> Option<&FullParams> {
        match &self.mode {
            Some(ControlMode::Full(p)) => Some(p),
            _ => None,
        }
    }

    #[inline]
    pub const fn interval_sec(&self) -> u32 {
        self.interval_sec
    }

    /// Output bounds of the last committed full parameter set.
    #[inline]
    pub fn bounds(&self) -> Option<OutputBounds> {
        self.last_full.map(|p| OutputBounds {
            min: p.output_min,
            max: p.output_max,
        })
    }

    /// T_max of the last committed full parameter set.
    #[inline]
    pub fn input_max(&self) -> Option<SensorValue> {
        self.last_full.map(|p| p.input_max)
    }

    /// Power ceiling of the last committed full parameter set (0 before any).
    #[inline]
    pub fn power_ceiling(&self) -> SensorValue {
        self.last_full.map_or(0, |p| p.power_max_adj)
    }

    /// Slot the current state was cached from.
    #[inline]
    pub const fn index(&self) -> Option<MetaStateIndex> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: MetaStateIndex) {
        self.index = Some(index);
    }

    /// Take safety limits (T_max, output bounds, power ceiling) from the
    /// normal record while an override governs. No-op in full mode or when
    /// `normal` is incomplete.
    pub fn seed_limits(&mut self, normal: &MetaStateRecord) -> bool {
        if self.full().is_some() {
            return false;
        }
        match full_params(normal) {
            Some((params, _)) => {
                self.last_full = Some(params);
                true
            }
            None => false,
        }
    }

    /// Validate `candidate` and commit it, resizing `history` as needed.
    ///
    /// Returns false and changes nothing when the interval is absent or out
    /// of range, or when a full-mode candidate misses any field.
    pub fn cache(&mut self, candidate: &MetaStateRecord, history: &mut SampleHistory) -> bool {
        let interval = match candidate.interval {
            Some(i) if (INTERVAL_SEC_MIN..=INTERVAL_SEC_MAX).contains(&i) => i,
            Some(i) => {
                debug!(interval = i, "meta-state interval out of bounds");
                return false;
            }
            None => {
                debug!("meta-state interval is absent");
                return false;
            }
        };

        if let Some(value) = candidate.output_override {
            self.mode = Some(ControlMode::Override(value));
            self.interval_sec = interval;
            return true;
        }

        let Some((params, history_len)) = full_params(candidate) else {
            return false;
        };

        debug!(power_max_adj = whole(params.power_max_adj), "full meta-state cached");

        history.resize((history_len as usize).max(HISTORY_LEN_MIN));
        self.last_full = Some(params);
        self.mode = Some(ControlMode::Full(params));
        self.interval_sec = interval;
        true
    }
}

fn full_params(c: &MetaStateRecord) -> Option<(FullParams, u32)> {
    macro_rules! required {
        ($field:ident) => {
            match c.$field {
                Some(v) => v,
                None => {
                    debug!(field = stringify!($field), "meta-state field missing");
                    return None;
                }
            }
        };
    }

    let g_p = required!(g_p);
    let g_d = required!(g_d);
    let g_r = required!(g_r);
    let input_target = required!(input_target);
    let input_max = required!(input_max);
    let max_power = required!(max_power);
    let power_adjustment = required!(power_adjustment);
    let output_min = required!(output_min);
    let output_max = required!(output_max);
    let history_len = required!(history_len);

    Some((
        FullParams {
            g_p,
            g_d,
            g_r,
            input_target,
            input_max,
            power_max_adj: max_power.wrapping_sub(power_adjustment),
            output_min,
            output_max,
        },
        history_len,
    ))
}

/// Candidate meta-states of one loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaStateSlots {
    /// Slot 0, installed by dataset selection.
    pub normal: Option<MetaStateRecord>,
    /// Slot 1, overtemp / uncalibrated.
    pub overtemp: Option<MetaStateRecord>,
    /// Operator-forced state; removed when it fails to cache.
    pub forced: Option<MetaStateRecord>,
}
