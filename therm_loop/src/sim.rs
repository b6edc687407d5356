//! Simulation: devices, thermal plants and the driver that runs a
//! [`LoopGroup`] against them on a simulated monotonic clock.
//!
//! Devices start unregistered. [`Simulation::register_devices`] registers
//! sensors, then actuators, which starts every loop.

pub mod devices;
pub mod plant;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use therm_common::fixed::whole;
use therm_common::hw::CalibrationMemory;

use crate::config::LoadedConfig;
use crate::control::dispatch::ActuatorPair;
use crate::cpu_loop::{CpuFanLoop, LoopDevices};
use crate::env::{EnvironmentStore, ScalarKey};
use crate::error::LoopError;
use crate::group::{FireReport, LoopGroup};
use crate::sampler::SensorSet;

pub use devices::{
    ActuatorProbe, DerivedPowerSensor, PlatformEvent, Probe, RecordingPlatform, RomContents,
    SimActuator, SimCalibrationMemory, SimSensor,
};
pub use plant::{to_fixed, LoadStep, PlantConfig, PlantProbes, ThermalPlant};

/// Totals of a simulation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub runaways: usize,
    pub sleeps: usize,
    /// Simulated time at the end of the run.
    pub elapsed: Duration,
}

pub struct Simulation {
    group: LoopGroup,
    plants: Vec<ThermalPlant>,
    platform: Arc<RecordingPlatform>,
    now: Duration,
    tick: Duration,
    sleep_for: Duration,
    asleep_until: Option<Duration>,
}

impl Simulation {
    /// Build devices, plants and loops.
    ///
    /// A loop whose calibration dataset cannot be selected is skipped and
    /// the system is flagged uncalibrated. Other construction errors abort.
    pub fn build(config: &LoadedConfig) -> Result<Self, LoopError> {
        let env = Arc::new(EnvironmentStore::new());
        let platform = Arc::new(RecordingPlatform::default());
        let mut group = LoopGroup::new(Arc::clone(&env));
        let mut plants = Vec::new();

        let mut memory = SimCalibrationMemory::default();
        for p in &config.simulation().plants {
            if let Some(rom) = &p.calibration {
                memory.insert(p.processor_id, rom);
            }
        }
        let memory: Arc<dyn CalibrationMemory> = Arc::new(memory);

        let mut uncalibrated = false;
        for loop_cfg in config.loops() {
            let Some(plant_cfg) = config.plant(loop_cfg.processor_id) else {
                warn!(loop_id = loop_cfg.loop_id, "no plant for loop, skipped");
                continue;
            };

            let probes = PlantProbes::new();
            let [temp_id, volt_id, amp_id, power_id] = loop_cfg.sensor_ids;
            let [primary_id, secondary_id] = loop_cfg.actuator_ids;
            let devices = LoopDevices {
                sensors: SensorSet {
                    temperature: Box::new(SimSensor::new(temp_id, probes.temperature.clone())),
                    voltage: Box::new(SimSensor::new(volt_id, probes.voltage.clone())),
                    current: Box::new(SimSensor::new(amp_id, probes.current.clone())),
                    power: Box::new(DerivedPowerSensor::new(
                        power_id,
                        probes.voltage.clone(),
                        probes.current.clone(),
                    )),
                },
                actuators: ActuatorPair {
                    primary: Box::new(SimActuator::new(primary_id, probes.primary.clone())),
                    secondary: Box::new(SimActuator::new(secondary_id, probes.secondary.clone())),
                },
                calibration: plant_cfg.calibration.as_ref().map(|_| Arc::clone(&memory)),
            };

            match CpuFanLoop::new(loop_cfg, devices, Arc::clone(&env), platform.clone()) {
                Ok(fan) => {
                    group.insert(fan)?;
                    plants.push(ThermalPlant::new(plant_cfg.clone(), probes));
                }
                Err(e @ LoopError::Dataset { .. }) => {
                    error!(error = %e, "loop not started, system uncalibrated");
                    env.set(ScalarKey::SystemUncalibrated, loop_cfg.processor_id);
                    uncalibrated = true;
                }
                Err(e) => return Err(e),
            }
        }

        if uncalibrated {
            group.broadcast_environment_change();
        }

        let sim = config.simulation();
        info!(loops = group.len(), plants = plants.len(), "simulation built");
        Ok(Self {
            group,
            plants,
            platform,
            now: Duration::ZERO,
            tick: Duration::from_millis(sim.tick_ms),
            sleep_for: Duration::from_secs(sim.sleep_sec),
            asleep_until: None,
        })
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.now
    }

    #[inline]
    pub fn group(&self) -> &LoopGroup {
        &self.group
    }

    #[inline]
    pub fn group_mut(&mut self) -> &mut LoopGroup {
        &mut self.group
    }

    #[inline]
    pub fn platform(&self) -> &RecordingPlatform {
        &self.platform
    }

    #[inline]
    pub fn is_asleep(&self) -> bool {
        self.asleep_until.is_some()
    }

    pub fn plant(&self, processor_id: u32) -> Option<&ThermalPlant> {
        self.plants.iter().find(|p| p.processor_id() == processor_id)
    }

    pub fn plant_mut(&mut self, processor_id: u32) -> Option<&mut ThermalPlant> {
        self.plants.iter_mut().find(|p| p.processor_id() == processor_id)
    }

    /// Register every sensor, then every actuator.
    pub fn register_devices(&mut self) -> FireReport {
        self.plants.iter().for_each(ThermalPlant::register_sensors);
        let mut report = self.group.sensor_registered(self.now);
        self.plants.iter().for_each(ThermalPlant::register_actuators);
        let second = self.group.actuator_registered(self.now);
        report.fired.extend(second.fired);
        report.runaways.extend(second.runaways);
        report.fanned_out |= second.fanned_out;
        self.handle_sleep_request();
        report
    }

    /// Advance one tick: step the plants, then run due loops.
    pub fn step(&mut self) -> FireReport {
        self.now += self.tick;
        let asleep = self.is_asleep();
        for plant in &mut self.plants {
            plant.step(self.now, self.tick, asleep);
        }

        if let Some(until) = self.asleep_until {
            if self.now >= until {
                self.asleep_until = None;
                self.group.did_wake(self.now);
            }
            return FireReport::default();
        }

        let report = self.group.fire_due(self.now);
        self.handle_sleep_request();
        report
    }

    fn handle_sleep_request(&mut self) {
        if self.platform.take_sleep_request() {
            self.group.will_sleep();
            self.asleep_until = Some(self.now + self.sleep_for);
            warn!(wake_at = ?self.asleep_until, "host asleep");
        }
    }

    /// Run for `duration` of simulated time or until `stop` is set.
    ///
    /// With `speedup > 0` each tick is paced to `tick / speedup` of wall time.
    pub fn run(&mut self, duration: Duration, speedup: f64, stop: &AtomicBool) -> RunSummary {
        let end = self.now + duration;
        let pace = (speedup > 0.0).then(|| self.tick.div_f64(speedup));
        let mut summary = RunSummary::default();
        let mut next_status = self.now;

        while self.now < end && !stop.load(Ordering::SeqCst) {
            let report = self.step();
            summary.ticks += 1;
            summary.runaways += report.runaways.len();

            if self.now >= next_status {
                self.log_status();
                next_status = self.now + Duration::from_secs(10);
            }
            if let Some(pace) = pace {
                std::thread::sleep(pace);
            }
        }

        summary.sleeps = self.platform.sleep_requests();
        summary.elapsed = self.now;
        summary
    }

    fn log_status(&self) {
        for fan in self.group.iter() {
            let temp = fan.temperatures().latest();
            info!(
                t = self.now.as_secs(),
                loop_id = fan.loop_id(),
                phase = %fan.phase(),
                temp_c = whole(temp),
                primary = fan.primary_target(),
                secondary = fan.secondary_target(),
                index = ?fan.meta_state_index(),
                "loop status"
            );
        }
    }
}
