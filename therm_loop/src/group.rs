//! `LoopGroup`: every control loop of the host plus the shared environment.
//!
//! Environment changes are fanned out here: when any loop (or an external
//! component) flips a flag, every loop re-selects its meta-state and
//! re-adjusts its controls.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cpu_loop::{CpuFanLoop, CycleOutcome};
use crate::env::{ArrayKey, EnvironmentStore, ScalarKey};
use crate::error::LoopError;

/// Summary of one `fire_due` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Loops whose deadline ran.
    pub fired: Vec<u32>,
    /// Whether the environment changed and all loops were re-adjusted.
    pub fanned_out: bool,
    /// Loops that declared thermal runaway.
    pub runaways: Vec<u32>,
}

#[derive(Debug)]
pub struct LoopGroup {
    env: Arc<EnvironmentStore>,
    loops: Vec<CpuFanLoop>,
}

impl LoopGroup {
    pub fn new(env: Arc<EnvironmentStore>) -> Self {
        Self {
            env,
            loops: Vec::new(),
        }
    }

    #[inline]
    pub fn env(&self) -> &Arc<EnvironmentStore> {
        &self.env
    }

    /// Add a loop. Identifiers must be unique within the group.
    pub fn insert(&mut self, fan: CpuFanLoop) -> Result<(), LoopError> {
        if self.get(fan.loop_id()).is_some() {
            return Err(LoopError::DuplicateLoop(fan.loop_id()));
        }
        self.loops.push(fan);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn get(&self, loop_id: u32) -> Option<&CpuFanLoop> {
        self.loops.iter().find(|l| l.loop_id() == loop_id)
    }

    pub fn get_mut(&mut self, loop_id: u32) -> Option<&mut CpuFanLoop> {
        self.loops.iter_mut().find(|l| l.loop_id() == loop_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CpuFanLoop> {
        self.loops.iter()
    }

    /// Earliest armed deadline across all loops.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.loops.iter().filter_map(CpuFanLoop::deadline).min()
    }

    /// Run every loop whose deadline is at or before `now`.
    pub fn fire_due(&mut self, now: Duration) -> FireReport {
        let mut report = FireReport::default();
        let mut env_changed = false;
        for fan in &mut self.loops {
            if fan.deadline().is_some_and(|d| d <= now) {
                let outcome = fan.deadline_passed(now);
                report.fired.push(fan.loop_id());
                env_changed |= absorb(&mut report, fan.loop_id(), outcome);
            }
        }
        if env_changed {
            self.broadcast_environment_change();
            report.fanned_out = true;
        }
        report
    }

    /// Re-select meta-states and re-adjust every loop.
    pub fn broadcast_environment_change(&mut self) {
        debug!(loops = self.loops.len(), "environment changed, re-adjusting all loops");
        for fan in &mut self.loops {
            if fan.update_meta_state() {
                fan.adjust_controls();
            }
        }
    }

    /// Forward a sensor registration to every loop.
    pub fn sensor_registered(&mut self, now: Duration) -> FireReport {
        self.forward_registration(now, CpuFanLoop::sensor_registered)
    }

    /// Forward an actuator registration to every loop.
    pub fn actuator_registered(&mut self, now: Duration) -> FireReport {
        self.forward_registration(now, CpuFanLoop::actuator_registered)
    }

    fn forward_registration(
        &mut self,
        now: Duration,
        notify: fn(&mut CpuFanLoop, Duration) -> Option<CycleOutcome>,
    ) -> FireReport {
        let mut report = FireReport::default();
        let mut env_changed = false;
        for fan in &mut self.loops {
            if let Some(outcome) = notify(fan, now) {
                report.fired.push(fan.loop_id());
                env_changed |= absorb(&mut report, fan.loop_id(), outcome);
            }
        }
        if env_changed {
            self.broadcast_environment_change();
            report.fanned_out = true;
        }
        report
    }

    pub fn will_sleep(&mut self) {
        info!("host going to sleep");
        self.loops.iter_mut().for_each(CpuFanLoop::will_sleep);
    }

    pub fn did_wake(&mut self, now: Duration) {
        info!("host woke up");
        for fan in &mut self.loops {
            fan.did_wake(now);
        }
    }

    /// Set or clear an external overtemp condition on behalf of `owner`.
    /// Returns whether the environment changed.
    pub fn set_external_overtemp(&mut self, owner: u32, active: bool) -> bool {
        let changed = self.env.set_array_flag(ArrayKey::ExternalOvertemp, owner, active);
        if changed {
            info!(owner, active, "external overtemp changed");
            self.broadcast_environment_change();
        }
        changed
    }

    /// Mark the system as running with an uncalibrated processor.
    pub fn set_system_uncalibrated(&mut self, processor_id: u32) {
        let changed = self.env.get(ScalarKey::SystemUncalibrated).is_none();
        self.env.set(ScalarKey::SystemUncalibrated, processor_id);
        if changed {
            self.broadcast_environment_change();
        }
    }
}

fn absorb(report: &mut FireReport, loop_id: u32, outcome: CycleOutcome) -> bool {
    if outcome.runaway.is_some() {
        report.runaways.push(loop_id);
    }
    outcome.env_changed
}
