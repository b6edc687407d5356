//! Shared rig: one loop on probe-backed devices.

use std::sync::Arc;
use std::time::Duration;

use therm_common::fixed::{from_whole, ONE_16_16};
use therm_common::loop_config::LoopConfig;
use therm_loop::control::dispatch::ActuatorPair;
use therm_loop::cpu_loop::{CpuFanLoop, LoopDevices};
use therm_loop::env::EnvironmentStore;
use therm_loop::error::LoopError;
use therm_loop::sampler::SensorSet;
use therm_loop::sim::{
    ActuatorProbe, DerivedPowerSensor, Probe, RecordingPlatform, RomContents, SimActuator,
    SimCalibrationMemory, SimSensor,
};

pub const AVERAGING: u8 = 0x23;
pub const CRITICAL: u8 = 0x01;

/// Unit proportional gain, target 40 °C, T_max 75 °C, output 0..=4000.
pub fn rom(variant: u8) -> RomContents {
    RomContents {
        bin_id: [0x12, 0x34, 0x56],
        version: 0x0001_03d1,
        g_p: 1 << 20,
        g_r: 0,
        g_d: 0,
        output_min: 0,
        output_max: 4000,
        history_len: 4,
        target_temp: 40,
        max_temp: 75,
        max_power: 80,
        power_adjustment: 5,
        processor_variant: variant,
    }
}

/// Loop `loop_id` on processor `loop_id`, plus extra TOML appended verbatim.
pub fn loop_config(loop_id: u32, extra: &str) -> LoopConfig {
    let base = loop_id * 10;
    let text = format!(
        "loop_id = {loop_id}\n\
         processor_id = {loop_id}\n\
         actuator_ids = [{}, {}]\n\
         sensor_ids = [{}, {}, {}, {}]\n\
         {extra}\n",
        base + 5,
        base + 6,
        base + 1,
        base + 2,
        base + 3,
        base + 4,
    );
    toml::from_str(&text).expect("test loop config")
}

pub struct LoopRig {
    pub temp: Probe,
    pub primary: ActuatorProbe,
    pub secondary: ActuatorProbe,
    pub platform: Arc<RecordingPlatform>,
    pub env: Arc<EnvironmentStore>,
    pub fan: CpuFanLoop,
}

impl LoopRig {
    pub fn new(config: &LoopConfig, rom: &RomContents, env: Arc<EnvironmentStore>) -> Self {
        Self::try_new(config, rom, env).expect("loop construction")
    }

    pub fn try_new(
        config: &LoopConfig,
        rom: &RomContents,
        env: Arc<EnvironmentStore>,
    ) -> Result<Self, LoopError> {
        let temp = Probe::registered(from_whole(42));
        let volts = Probe::registered(ONE_16_16);
        let amps = Probe::registered(from_whole(20));
        let primary = ActuatorProbe::registered();
        let secondary = ActuatorProbe::registered();
        let [t, v, c, p] = config.sensor_ids;
        let [a, b] = config.actuator_ids;
        let devices = LoopDevices {
            sensors: SensorSet {
                temperature: Box::new(SimSensor::new(t, temp.clone())),
                voltage: Box::new(SimSensor::new(v, volts.clone())),
                current: Box::new(SimSensor::new(c, amps.clone())),
                power: Box::new(DerivedPowerSensor::new(p, volts, amps)),
            },
            actuators: ActuatorPair {
                primary: Box::new(SimActuator::new(a, primary.clone())),
                secondary: Box::new(SimActuator::new(b, secondary.clone())),
            },
            calibration: Some(Arc::new(SimCalibrationMemory::with_image(
                config.processor_id,
                rom,
            ))),
        };
        let platform = Arc::new(RecordingPlatform::default());
        let fan = CpuFanLoop::new(config, devices, Arc::clone(&env), platform.clone())?;
        Ok(Self {
            temp,
            primary,
            secondary,
            platform,
            env,
            fan,
        })
    }

    /// Single loop on its own environment.
    pub fn solo(variant: u8, extra: &str) -> Self {
        Self::new(&loop_config(1, extra), &rom(variant), Arc::new(EnvironmentStore::new()))
    }

    /// Register and run the first cycle at t = 0.
    pub fn start(&mut self) {
        self.fan
            .sensor_registered(Duration::ZERO)
            .expect("registration completes");
    }

    pub fn set_temp(&self, celsius: i32) {
        self.temp.set(from_whole(celsius));
    }
}

/// `n` whole seconds.
pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
