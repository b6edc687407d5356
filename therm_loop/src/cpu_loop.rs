//! `CpuFanLoop`: one processor's control loop.
//!
//! Owns its devices, histories and cached meta-state. Only the environment
//! store is shared with other loops. Every entry point takes `&mut self`;
//! the coordinator serializes calls per loop.

use std::sync::Arc;
use std::time::Duration;

use static_assertions::assert_impl_all;
use tracing::{debug, error, info, warn};

use therm_common::calibration::{CalibrationRecord, ProcessorVariant};
use therm_common::fixed::{whole, ControlValue, SensorValue};
use therm_common::hw::{CalibrationMemory, DiagnosticSnapshot, Platform, RunawayCause};
use therm_common::loop_config::{AveragingConfig, LoopConfig};
use therm_common::meta_state::{MetaStateIndex, MetaStateRecord};

use crate::control::dispatch::{dispatch, ActuatorPair, DispatchOutcome};
use crate::control::pid::{calculate_new_target, PidInputs};
use crate::dataset::select_dataset;
use crate::env::{ArrayKey, EnvironmentStore, ScalarKey};
use crate::error::LoopError;
use crate::history::{SampleHistory, TemperatureHistory};
use crate::meta::{ControlMode, LiveControlState, MetaStateSlots};
use crate::safety::{monitor_for, SafetyContext, SafetyMonitor};
use crate::sampler::{Sampler, SensorSet};
use crate::schedule::{LoopPhase, PhaseEvent, Registration, Scheduler, TransitionResult};

/// Devices and calibration source handed to a loop at construction.
pub struct LoopDevices {
    pub sensors: SensorSet,
    pub actuators: ActuatorPair,
    /// `None` when the processor has no calibration memory bound.
    pub calibration: Option<Arc<dyn CalibrationMemory>>,
}

/// What one deadline did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// The loop ran (registered and not suspended).
    pub ran: bool,
    /// The safety monitor changed the environment; every loop of the group
    /// must re-select its meta-state and re-adjust.
    pub env_changed: bool,
    /// Runaway declared this cycle; the host has been asked to sleep.
    pub runaway: Option<RunawayCause>,
}

pub struct CpuFanLoop {
    loop_id: u32,
    processor_id: u32,
    description: String,
    intake_scaling: u32,
    candidates: Vec<CalibrationRecord>,
    calibration: Option<Arc<dyn CalibrationMemory>>,
    variant: ProcessorVariant,
    averaging: AveragingConfig,

    env: Arc<EnvironmentStore>,
    platform: Arc<dyn Platform>,

    sensors: SensorSet,
    actuators: ActuatorPair,
    sampler: Sampler,
    history: SampleHistory,
    live: LiveControlState,
    slots: MetaStateSlots,
    monitor: Box<dyn SafetyMonitor>,
    scheduler: Scheduler,
}

assert_impl_all!(CpuFanLoop: Send);

impl std::fmt::Debug for CpuFanLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuFanLoop")
            .field("loop_id", &self.loop_id)
            .field("processor_id", &self.processor_id)
            .field("variant", &self.variant)
            .field("phase", &self.scheduler.phase())
            .field("index", &self.live.index())
            .finish_non_exhaustive()
    }
}

fn check_ids(loop_id: u32, roles: &[&'static str], expected: &[u32], actual: &[u32]) -> Result<(), LoopError> {
    for ((role, &expected), &actual) in roles.iter().zip(expected).zip(actual) {
        if expected != actual {
            return Err(LoopError::DeviceMismatch {
                loop_id,
                role,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

impl CpuFanLoop {
    /// Bind devices, select the calibration dataset and cache the initial
    /// meta-state.
    pub fn new(
        config: &LoopConfig,
        devices: LoopDevices,
        env: Arc<EnvironmentStore>,
        platform: Arc<dyn Platform>,
    ) -> Result<Self, LoopError> {
        let loop_id = config.loop_id;
        check_ids(
            loop_id,
            &["temperature sensor", "voltage sensor", "current sensor", "power sensor"],
            &config.sensor_ids,
            &devices.sensors.ids(),
        )?;
        check_ids(
            loop_id,
            &["primary actuator", "secondary actuator"],
            &config.actuator_ids,
            &devices.actuators.ids(),
        )?;

        let candidates = config.dataset_records();
        let selection = select_dataset(devices.calibration.as_deref(), config.processor_id, &candidates)
            .map_err(|source| LoopError::Dataset { loop_id, source })?;

        let sampler = match selection.variant {
            ProcessorVariant::Averaging => Sampler::with_averaging(config.averaging.sample_count),
            ProcessorVariant::Critical => Sampler::default(),
        };

        let mut this = Self {
            loop_id,
            processor_id: config.processor_id,
            description: config.description.clone(),
            intake_scaling: config.intake_scaling,
            candidates,
            calibration: devices.calibration,
            variant: selection.variant,
            averaging: config.averaging,
            env,
            platform,
            sensors: devices.sensors,
            actuators: devices.actuators,
            sampler,
            history: SampleHistory::default(),
            live: LiveControlState::default(),
            slots: MetaStateSlots {
                normal: Some(selection.record.to_meta_state()),
                overtemp: config.overtemp.clone(),
                forced: config.forced.clone(),
            },
            monitor: monitor_for(selection.variant, &config.averaging),
            scheduler: Scheduler::new(loop_id),
        };

        if !this.update_meta_state() {
            return Err(LoopError::NoValidMetaState(loop_id));
        }
        this.seed_safety_limits();

        info!(
            loop_id,
            processor_id = this.processor_id,
            description = %this.description,
            variant = ?this.variant,
            "control loop created"
        );
        Ok(this)
    }

    // ─── Accessors ──────────────────────────────────────────────────

    #[inline]
    pub const fn loop_id(&self) -> u32 {
        self.loop_id
    }

    #[inline]
    pub const fn processor_id(&self) -> u32 {
        self.processor_id
    }

    #[inline]
    pub const fn variant(&self) -> ProcessorVariant {
        self.variant
    }

    #[inline]
    pub const fn phase(&self) -> LoopPhase {
        self.scheduler.phase()
    }

    #[inline]
    pub const fn deadline(&self) -> Option<Duration> {
        self.scheduler.deadline()
    }

    #[inline]
    pub const fn live(&self) -> &LiveControlState {
        &self.live
    }

    #[inline]
    pub const fn history(&self) -> &SampleHistory {
        &self.history
    }

    #[inline]
    pub const fn temperatures(&self) -> &TemperatureHistory {
        self.sampler.temperatures()
    }

    #[inline]
    pub fn meta_state_index(&self) -> Option<MetaStateIndex> {
        self.live.index()
    }

    #[inline]
    pub fn primary_target(&self) -> ControlValue {
        self.actuators.primary.target()
    }

    #[inline]
    pub fn secondary_target(&self) -> ControlValue {
        self.actuators.secondary.target()
    }

    #[inline]
    pub fn seconds_at_max_cooling(&self) -> u32 {
        self.monitor.seconds_at_max_cooling()
    }

    // ─── Registration ───────────────────────────────────────────────

    fn registration(&self) -> Registration {
        let mut r = Registration::empty();
        r.set(Registration::TEMPERATURE, self.sensors.temperature.is_registered());
        r.set(Registration::VOLTAGE, self.sensors.voltage.is_registered());
        r.set(Registration::CURRENT, self.sensors.current.is_registered());
        r.set(Registration::PRIMARY_ACTUATOR, self.actuators.primary.is_registered());
        r.set(Registration::SECONDARY_ACTUATOR, self.actuators.secondary.is_registered());
        r
    }

    fn check_all_registered(&mut self, now: Duration) -> Option<CycleOutcome> {
        let registered = self.registration();
        if self.scheduler.mark_registered(registered) {
            Some(self.deadline_passed(now))
        } else {
            None
        }
    }

    /// A sensor driver registered. Runs the first cycle immediately when
    /// this completes the device set.
    pub fn sensor_registered(&mut self, now: Duration) -> Option<CycleOutcome> {
        self.check_all_registered(now)
    }

    /// An actuator driver registered. Same completion rule as sensors.
    pub fn actuator_registered(&mut self, now: Duration) -> Option<CycleOutcome> {
        self.check_all_registered(now)
    }

    // ─── Cycle ──────────────────────────────────────────────────────

    /// Sample, run the safety monitor, arm the next deadline and, unless the
    /// environment changed, adjust the controls.
    pub fn deadline_passed(&mut self, now: Duration) -> CycleOutcome {
        if !self.scheduler.is_running() {
            debug!(loop_id = self.loop_id, phase = %self.phase(), "deadline ignored");
            return CycleOutcome::default();
        }
        let mut outcome = CycleOutcome {
            ran: true,
            ..CycleOutcome::default()
        };

        self.sampler
            .acquire(&mut self.sensors, &mut self.history, self.live.power_ceiling());

        if let Some(input_max) = self.live.input_max() {
            let ctx = SafetyContext {
                loop_id: self.loop_id,
                latest: self.sampler.temperatures().latest(),
                average: self.sampler.average(),
                input_max,
                primary_target: self.actuators.primary.target(),
                output_max: self.live.bounds().map(|b| b.max),
                interval_sec: self.live.interval_sec(),
            };
            let monitor = &mut self.monitor;
            let verdict = self.env.transact(|env| monitor.evaluate(&ctx, env));
            outcome.env_changed = verdict.env_changed;

            if let Some(cause) = verdict.runaway {
                outcome.runaway = Some(cause);
                self.enter_runaway(cause, input_max);
                return outcome;
            }
        }

        self.scheduler.arm_next(now, self.live.interval_sec());

        if !outcome.env_changed {
            self.adjust_controls();
        }
        outcome
    }

    fn enter_runaway(&mut self, cause: RunawayCause, input_max: SensorValue) {
        let snapshot = DiagnosticSnapshot {
            loop_id: self.loop_id,
            processor_id: self.processor_id,
            cause,
            temperature: self.sampler.temperatures().latest(),
            average_temperature: self.sampler.average(),
            input_max,
            primary_target: self.actuators.primary.target(),
            seconds_at_max_cooling: self.monitor.seconds_at_max_cooling(),
        };
        self.platform.dump_diagnostics(&snapshot);
        self.platform.request_sleep();
        self.scheduler.handle_event(PhaseEvent::Suspend);
        error!(
            loop_id = self.loop_id,
            temperature = whole(snapshot.temperature),
            ?cause,
            "sleep requested, loop suspended"
        );
    }

    /// Re-select the governing meta-state against one environment snapshot.
    ///
    /// Precedence: overtemp, then forced, then normal. A forced state that
    /// fails to cache is dropped.
    pub fn update_meta_state(&mut self) -> bool {
        let env = self.env.snapshot();
        let overtemp_active = (self.variant == ProcessorVariant::Averaging
            && env.array_flag_anywhere(ArrayKey::InternalOvertemp))
            || env.array_flag_anywhere(ArrayKey::ExternalOvertemp)
            || env.get(ScalarKey::SystemUncalibrated).is_some();

        if overtemp_active {
            if let Some(record) = self.slots.overtemp.as_ref() {
                if self.live.cache(record, &mut self.history) {
                    self.commit_index(MetaStateIndex::Overtemp);
                    return true;
                }
            }
        }

        if let Some(record) = self.slots.forced.as_ref() {
            if self.live.cache(record, &mut self.history) {
                self.commit_index(MetaStateIndex::Forced);
                return true;
            }
            warn!(loop_id = self.loop_id, "forced meta-state invalid, removed");
            self.slots.forced = None;
        }

        if let Some(record) = self.slots.normal.as_ref() {
            if self.live.cache(record, &mut self.history) {
                self.commit_index(MetaStateIndex::Normal);
                return true;
            }
        }

        error!(loop_id = self.loop_id, "no valid meta-state");
        false
    }

    /// Runaway detection needs T_max even when the loop starts under an
    /// override; take it from the selected dataset.
    fn seed_safety_limits(&mut self) {
        let Some(normal) = self.slots.normal.as_ref() else {
            return;
        };
        if self.live.seed_limits(normal) {
            debug!(loop_id = self.loop_id, "safety limits taken from normal meta-state");
        }
    }

    fn commit_index(&mut self, index: MetaStateIndex) {
        if self.live.index() != Some(index) {
            info!(loop_id = self.loop_id, %index, "meta-state selected");
        }
        self.live.set_index(index);
    }

    /// Install or clear the operator-forced meta-state, then re-select.
    pub fn set_forced_meta_state(&mut self, record: Option<MetaStateRecord>) -> bool {
        self.slots.forced = record;
        self.update_meta_state()
    }

    /// Compute and dispatch new targets.
    pub fn adjust_controls(&mut self) -> DispatchOutcome {
        if !self.scheduler.is_running() {
            return DispatchOutcome::default();
        }
        let Some(mode) = self.live.mode().copied() else {
            warn!(loop_id = self.loop_id, "no meta-state cached, controls not adjusted");
            return DispatchOutcome::default();
        };

        let target = match mode {
            ControlMode::Full(params) if self.monitor.take_force_full_cooling() => {
                debug!(loop_id = self.loop_id, "forcing full cooling");
                params.output_max
            }
            _ => {
                let inputs = PidInputs {
                    history: &self.history,
                    temperatures: self.sampler.temperatures(),
                    current_target: self.actuators.primary.target(),
                    interval_sec: self.live.interval_sec(),
                    first_adjustment: self.phase() == LoopPhase::FirstAdjustment,
                };
                calculate_new_target(&mode, &inputs)
            }
        };

        let outcome = dispatch(
            &mut self.actuators,
            target,
            self.scheduler.forces_send(),
            self.intake_scaling,
            self.live.bounds(),
        );
        if outcome.primary_sent {
            self.scheduler.handle_event(PhaseEvent::AdjustmentSent);
        }
        debug!(
            loop_id = self.loop_id,
            temp = whole(self.sampler.temperatures().latest()),
            target,
            sent = outcome.primary_sent,
            "controls adjusted"
        );
        outcome
    }

    // ─── Power management ───────────────────────────────────────────

    /// Host is about to sleep: cancel the deadline.
    pub fn will_sleep(&mut self) {
        if let TransitionResult::Ok(_) = self.scheduler.handle_event(PhaseEvent::Suspend) {
            info!(loop_id = self.loop_id, "loop suspended for host sleep");
        }
    }

    /// Host woke: start a new runaway episode and re-arm an absolute deadline.
    pub fn did_wake(&mut self, now: Duration) {
        match self.scheduler.handle_event(PhaseEvent::Wake) {
            TransitionResult::Ok(_) => {
                self.monitor.rearm();
                let next = self.scheduler.arm_next(now, self.live.interval_sec());
                info!(loop_id = self.loop_id, ?next, "loop resumed after wake");
            }
            TransitionResult::Rejected(reason) => {
                debug!(loop_id = self.loop_id, reason, "wake ignored");
            }
        }
    }

    /// Re-read calibration memory and re-arbitrate against the configured
    /// datasets. On failure the previous normal meta-state stays.
    pub fn reselect_dataset(&mut self) -> Result<(), LoopError> {
        let selection = select_dataset(self.calibration.as_deref(), self.processor_id, &self.candidates)
            .map_err(|source| {
                warn!(loop_id = self.loop_id, error = %source, "dataset re-selection failed");
                LoopError::Dataset {
                    loop_id: self.loop_id,
                    source,
                }
            })?;

        if selection.variant != self.variant {
            info!(loop_id = self.loop_id, variant = ?selection.variant, "processor variant changed");
            self.variant = selection.variant;
            self.monitor = monitor_for(selection.variant, &self.averaging);
            self.sampler = match selection.variant {
                ProcessorVariant::Averaging => Sampler::with_averaging(self.averaging.sample_count),
                ProcessorVariant::Critical => Sampler::default(),
            };
        }

        self.slots.normal = Some(selection.record.to_meta_state());
        if self.update_meta_state() {
            self.seed_safety_limits();
            Ok(())
        } else {
            Err(LoopError::NoValidMetaState(self.loop_id))
        }
    }
}
