//! Lumped thermal model of one processor package.
//!
//! `dT/dt = (P − G·(T − T_ambient)) / C`, with the conductance `G` growing
//! linearly with the primary and secondary actuator targets. Integrated with
//! explicit Euler steps of the simulation tick.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use therm_common::fixed::{SensorValue, ONE_16_16};

use super::devices::{ActuatorProbe, Probe, RomContents};

/// Load applied from `at_sec` on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadStep {
    pub at_sec: f64,
    pub watts: f64,
}

/// Simulated processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlantConfig {
    pub processor_id: u32,
    #[serde(default = "default_ambient_c")]
    pub ambient_c: f64,
    /// Heat capacity [J/°C].
    #[serde(default = "default_thermal_mass")]
    pub thermal_mass_j_per_c: f64,
    /// Conductance with both actuators stopped [W/°C].
    #[serde(default = "default_passive")]
    pub passive_w_per_c: f64,
    /// Extra conductance with the primary actuator at full scale [W/°C].
    #[serde(default = "default_fan")]
    pub fan_w_per_c: f64,
    /// Extra conductance with the secondary actuator at full scale [W/°C].
    #[serde(default = "default_intake")]
    pub intake_w_per_c: f64,
    /// Actuator target treated as full speed.
    #[serde(default = "default_full_scale")]
    pub output_full_scale: u32,
    #[serde(default = "default_supply_volts")]
    pub supply_volts: f64,
    /// Load profile, ordered by `at_sec`. No load before the first step.
    #[serde(default)]
    pub load: Vec<LoadStep>,
    /// Calibration memory contents; absent means no calibration memory.
    #[serde(default)]
    pub calibration: Option<RomContents>,
}

fn default_ambient_c() -> f64 {
    25.0
}
fn default_thermal_mass() -> f64 {
    40.0
}
fn default_passive() -> f64 {
    0.5
}
fn default_fan() -> f64 {
    4.0
}
fn default_intake() -> f64 {
    1.0
}
fn default_full_scale() -> u32 {
    4000
}
fn default_supply_volts() -> f64 {
    12.0
}

impl PlantConfig {
    /// Check physical parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.thermal_mass_j_per_c.is_nan() || self.thermal_mass_j_per_c <= 0.0 {
            return Err(format!(
                "plant {}: thermal_mass_j_per_c must be positive",
                self.processor_id
            ));
        }
        if self.supply_volts.is_nan() || self.supply_volts <= 0.0 {
            return Err(format!("plant {}: supply_volts must be positive", self.processor_id));
        }
        if self.output_full_scale == 0 {
            return Err(format!("plant {}: output_full_scale must be non-zero", self.processor_id));
        }
        if self.passive_w_per_c < 0.0 || self.fan_w_per_c < 0.0 || self.intake_w_per_c < 0.0 {
            return Err(format!("plant {}: conductances must not be negative", self.processor_id));
        }
        if self.load.windows(2).any(|w| w[1].at_sec < w[0].at_sec) {
            return Err(format!("plant {}: load steps out of order", self.processor_id));
        }
        Ok(())
    }

    /// Load in watts at `t` seconds.
    pub fn load_at(&self, t: f64) -> f64 {
        self.load
            .iter()
            .rev()
            .find(|s| s.at_sec <= t)
            .map_or(0.0, |s| s.watts)
    }
}

/// Engineering units to 16.16, saturating.
#[inline]
pub fn to_fixed(value: f64) -> SensorValue {
    (value * ONE_16_16 as f64).round() as SensorValue
}

/// Probes connecting the plant to its simulated devices.
#[derive(Debug, Clone)]
pub struct PlantProbes {
    pub temperature: Probe,
    pub voltage: Probe,
    pub current: Probe,
    pub primary: ActuatorProbe,
    pub secondary: ActuatorProbe,
}

impl PlantProbes {
    /// Fresh, unregistered probes.
    pub fn new() -> Self {
        Self {
            temperature: Probe::unregistered(0),
            voltage: Probe::unregistered(0),
            current: Probe::unregistered(0),
            primary: ActuatorProbe::unregistered(),
            secondary: ActuatorProbe::unregistered(),
        }
    }
}

impl Default for PlantProbes {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ThermalPlant {
    config: PlantConfig,
    temperature_c: f64,
    probes: PlantProbes,
}

impl ThermalPlant {
    /// Plant at ambient temperature, probes primed.
    pub fn new(config: PlantConfig, probes: PlantProbes) -> Self {
        let plant = Self {
            temperature_c: config.ambient_c,
            config,
            probes,
        };
        plant.publish(0.0);
        plant
    }

    #[inline]
    pub fn processor_id(&self) -> u32 {
        self.config.processor_id
    }

    #[inline]
    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    /// Force the die temperature, e.g. to stage a fault in tests.
    pub fn set_temperature_c(&mut self, value: f64) {
        self.temperature_c = value;
        self.probes.temperature.set(to_fixed(value));
    }

    #[inline]
    pub fn probes(&self) -> &PlantProbes {
        &self.probes
    }

    pub fn register_sensors(&self) {
        self.probes.temperature.set_registered(true);
        self.probes.voltage.set_registered(true);
        self.probes.current.set_registered(true);
    }

    pub fn register_actuators(&self) {
        self.probes.primary.set_registered(true);
        self.probes.secondary.set_registered(true);
    }

    fn fraction(&self, target: u32) -> f64 {
        (target as f64 / self.config.output_full_scale as f64).min(1.0)
    }

    /// Advance by `dt` ending at `now`. A sleeping host dissipates nothing.
    pub fn step(&mut self, now: Duration, dt: Duration, asleep: bool) {
        let watts = if asleep {
            0.0
        } else {
            self.config.load_at(now.as_secs_f64())
        };
        let conductance = self.config.passive_w_per_c
            + self.config.fan_w_per_c * self.fraction(self.probes.primary.target())
            + self.config.intake_w_per_c * self.fraction(self.probes.secondary.target());
        let flow = watts - conductance * (self.temperature_c - self.config.ambient_c);
        self.temperature_c += flow * dt.as_secs_f64() / self.config.thermal_mass_j_per_c;
        self.publish(watts);
        trace!(
            processor_id = self.config.processor_id,
            temp_c = self.temperature_c,
            watts,
            conductance,
            "plant step"
        );
    }

    fn publish(&self, watts: f64) {
        self.probes.temperature.set(to_fixed(self.temperature_c));
        self.probes.voltage.set(to_fixed(self.config.supply_volts));
        self.probes
            .current
            .set(to_fixed(watts / self.config.supply_volts));
    }
}
