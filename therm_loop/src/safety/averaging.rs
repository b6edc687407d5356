//! Averaging-aware monitor.
//!
//! Enters low-power mode (internal overtemp) when the rolling average or the
//! instantaneous reading crosses its threshold above T_max. An average-caused
//! entry latches until the instantaneous reading drops below the average
//! threshold. Leaving low-power mode forces full cooling for one interval.

use tracing::{error, info};

use therm_common::calibration::ProcessorVariant;
use therm_common::consts::RELEASE_AFTER_SLEW_INTERVALS;
use therm_common::fixed::{from_whole, whole};
use therm_common::hw::RunawayCause;
use therm_common::loop_config::AveragingConfig;

use super::{RunawayLatch, SafetyContext, SafetyMonitor, SafetyVerdict};
use crate::env::{ArrayKey, Environment};

#[derive(Debug, Clone)]
pub struct AveragingMonitor {
    config: AveragingConfig,
    overtemp_average: bool,
    release_intervals: u32,
    latch: RunawayLatch,
}

impl AveragingMonitor {
    pub fn new(config: AveragingConfig) -> Self {
        Self {
            config,
            overtemp_average: false,
            release_intervals: 0,
            latch: RunawayLatch::default(),
        }
    }

    /// Low-power mode was entered on the rolling average.
    #[inline]
    pub fn overtemp_average(&self) -> bool {
        self.overtemp_average
    }
}

impl SafetyMonitor for AveragingMonitor {
    fn variant(&self) -> ProcessorVariant {
        ProcessorVariant::Averaging
    }

    fn evaluate(&mut self, ctx: &SafetyContext, env: &mut Environment) -> SafetyVerdict {
        let max = ctx.input_max;
        let average_limit = max.saturating_add(from_whole(self.config.average_offset));
        let immediate_limit = max.saturating_add(from_whole(self.config.slew_offset));
        let sleep_limit = max.saturating_add(from_whole(self.config.sleep_offset));

        let slewing = env.array_flag_for_owner(ArrayKey::InternalOvertemp, ctx.loop_id);
        let over_average = ctx.average >= average_limit;
        let over_immediate = ctx.latest >= immediate_limit;

        let mut env_changed = false;
        if !self.overtemp_average && (over_average || over_immediate) {
            if !slewing {
                self.overtemp_average = over_average;
                env_changed = env.set_array_flag(ArrayKey::InternalOvertemp, ctx.loop_id, true);
                info!(
                    loop_id = ctx.loop_id,
                    average = whole(ctx.average),
                    latest = whole(ctx.latest),
                    on_average = over_average,
                    "entering low-power mode"
                );
            }
        } else if slewing && (!self.overtemp_average || ctx.latest < average_limit) {
            self.overtemp_average = false;
            self.release_intervals = RELEASE_AFTER_SLEW_INTERVALS;
            env_changed = env.set_array_flag(ArrayKey::InternalOvertemp, ctx.loop_id, false);
            info!(loop_id = ctx.loop_id, latest = whole(ctx.latest), "leaving low-power mode");
        }

        let cause = (ctx.latest >= sleep_limit).then_some(RunawayCause::CriticalOvershoot);
        let runaway = self.latch.edge(cause);
        if runaway.is_some() {
            error!(
                loop_id = ctx.loop_id,
                latest = whole(ctx.latest),
                max = whole(max),
                sleep_offset = self.config.sleep_offset,
                "thermal runaway detected"
            );
        }

        SafetyVerdict { env_changed, runaway }
    }

    fn take_force_full_cooling(&mut self) -> bool {
        if self.release_intervals == 0 {
            return false;
        }
        self.release_intervals -= 1;
        true
    }

    fn rearm(&mut self) {
        self.latch.reset();
    }
}
