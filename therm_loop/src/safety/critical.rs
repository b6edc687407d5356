//! Critical-offset monitor.
//!
//! Latches internal overtemp while the temperature is above T_max and counts
//! the seconds spent there at maximum cooling. Runaway when the overshoot
//! reaches the critical offset or the count reaches the limit.

use tracing::{debug, error, info};

use therm_common::calibration::ProcessorVariant;
use therm_common::consts::{CRITICAL_TEMP_OFFSET, MAX_COOLING_LIMIT_SEC};
use therm_common::fixed::whole;
use therm_common::hw::RunawayCause;

use super::{RunawayLatch, SafetyContext, SafetyMonitor, SafetyVerdict};
use crate::env::{ArrayKey, Environment};

#[derive(Debug, Clone, Default)]
pub struct CriticalMonitor {
    seconds_at_max_cooling: u32,
    latch: RunawayLatch,
}

impl CriticalMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SafetyMonitor for CriticalMonitor {
    fn variant(&self) -> ProcessorVariant {
        ProcessorVariant::Critical
    }

    fn evaluate(&mut self, ctx: &SafetyContext, env: &mut Environment) -> SafetyVerdict {
        let diff = ctx.latest.wrapping_sub(ctx.input_max);
        let exceeded_before = env.array_flag_for_owner(ArrayKey::InternalOvertemp, ctx.loop_id);
        let exceeded_now = diff > 0;

        let mut cause = None;
        if exceeded_now {
            if exceeded_before && ctx.at_max_cooling() {
                self.seconds_at_max_cooling =
                    self.seconds_at_max_cooling.saturating_add(ctx.interval_sec);
                debug!(
                    loop_id = ctx.loop_id,
                    seconds = self.seconds_at_max_cooling,
                    "above T_max at maximum cooling"
                );
            }

            if diff >= CRITICAL_TEMP_OFFSET {
                cause = Some(RunawayCause::CriticalOvershoot);
            } else if self.seconds_at_max_cooling >= MAX_COOLING_LIMIT_SEC {
                cause = Some(RunawayCause::MaxCoolingTimeout);
            }
        }

        let runaway = self.latch.edge(cause);
        if let Some(cause) = runaway {
            error!(
                loop_id = ctx.loop_id,
                latest = whole(ctx.latest),
                max = whole(ctx.input_max),
                seconds_at_max_cooling = self.seconds_at_max_cooling,
                ?cause,
                "thermal runaway detected"
            );
        }

        let mut env_changed = false;
        if exceeded_before && !exceeded_now {
            self.seconds_at_max_cooling = 0;
            env_changed = env.set_array_flag(ArrayKey::InternalOvertemp, ctx.loop_id, false);
            info!(loop_id = ctx.loop_id, "temperature back at or below T_max");
        } else if exceeded_now && !exceeded_before {
            env_changed = env.set_array_flag(ArrayKey::InternalOvertemp, ctx.loop_id, true);
            info!(loop_id = ctx.loop_id, latest = whole(ctx.latest), "temperature above T_max");
        }

        SafetyVerdict { env_changed, runaway }
    }

    fn seconds_at_max_cooling(&self) -> u32 {
        self.seconds_at_max_cooling
    }

    fn rearm(&mut self) {
        self.latch.reset();
    }
}
