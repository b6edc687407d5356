//! TOML configuration loader with validation.
//!
//! One file describes the shared settings, every control loop and the
//! simulated plant behind each processor. Everything is validated once at
//! load; the runtime never sees an unchecked configuration.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use therm_common::config::{ConfigError, ConfigLoader, SharedConfig};
use therm_common::loop_config::LoopConfig;

use crate::sim::PlantConfig;

// ─── Error Type ─────────────────────────────────────────────────────

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Reading or parsing failed, or a section rejected its own contents.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The file declares no control loop.
    #[error("no control loops configured")]
    NoLoops,

    /// Two loops share an identifier.
    #[error("duplicate loop id {0}")]
    DuplicateLoop(u32),

    /// Two plants model the same processor.
    #[error("duplicate plant for processor {0}")]
    DuplicatePlant(u32),

    /// A loop controls a processor with no simulated plant.
    #[error("loop {loop_id}: no plant for processor {processor_id}")]
    MissingPlant { loop_id: u32, processor_id: u32 },

    /// Simulation settings out of range.
    #[error("simulation: {0}")]
    Simulation(String),
}

// ─── Config Types ───────────────────────────────────────────────────

/// Simulation driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Plant integration step [ms].
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// How long the host stays asleep after a sleep request [s].
    #[serde(default = "default_sleep_sec")]
    pub sleep_sec: u64,
    #[serde(default)]
    pub plants: Vec<PlantConfig>,
}

fn default_tick_ms() -> u64 {
    100
}
fn default_sleep_sec() -> u64 {
    10
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            sleep_sec: default_sleep_sec(),
            plants: Vec::new(),
        }
    }
}

/// Top-level file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThermConfig {
    pub shared: SharedConfig,
    pub loops: Vec<LoopConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

// ─── Loaded Config Bundle ───────────────────────────────────────────

/// Validated configuration, ready for runtime use.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ThermConfig,
}

impl LoadedConfig {
    #[inline]
    pub fn shared(&self) -> &SharedConfig {
        &self.config.shared
    }

    #[inline]
    pub fn loops(&self) -> &[LoopConfig] {
        &self.config.loops
    }

    #[inline]
    pub fn simulation(&self) -> &SimulationConfig {
        &self.config.simulation
    }

    pub fn plant(&self, processor_id: u32) -> Option<&PlantConfig> {
        self.config
            .simulation
            .plants
            .iter()
            .find(|p| p.processor_id == processor_id)
    }
}

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<LoadedConfig, LoadError> {
    let config = ThermConfig::load(path)?;
    validate_config(&config)?;
    Ok(LoadedConfig { config })
}

/// Parse and validate configuration text.
pub fn load_config_from_str(content: &str) -> Result<LoadedConfig, LoadError> {
    let config = ThermConfig::from_toml_str(content)?;
    validate_config(&config)?;
    Ok(LoadedConfig { config })
}

// ─── Validation ─────────────────────────────────────────────────────

/// Run every validation rule.
pub fn validate_config(config: &ThermConfig) -> Result<(), LoadError> {
    config.shared.validate()?;
    validate_loops(&config.loops)?;
    validate_simulation(&config.simulation, &config.loops)
}

/// Per-loop structure plus loop id uniqueness.
pub fn validate_loops(loops: &[LoopConfig]) -> Result<(), LoadError> {
    if loops.is_empty() {
        return Err(LoadError::NoLoops);
    }
    let mut ids = HashSet::new();
    for l in loops {
        l.validate()?;
        if !ids.insert(l.loop_id) {
            return Err(LoadError::DuplicateLoop(l.loop_id));
        }
    }
    Ok(())
}

/// Plant parameters, one plant per processor, and a plant for every loop.
pub fn validate_simulation(sim: &SimulationConfig, loops: &[LoopConfig]) -> Result<(), LoadError> {
    if sim.tick_ms == 0 {
        return Err(LoadError::Simulation("tick_ms must be non-zero".into()));
    }
    let mut processors = HashSet::new();
    for plant in &sim.plants {
        plant.validate().map_err(LoadError::Simulation)?;
        if !processors.insert(plant.processor_id) {
            return Err(LoadError::DuplicatePlant(plant.processor_id));
        }
    }
    for l in loops {
        if !processors.contains(&l.processor_id) {
            return Err(LoadError::MissingPlant {
                loop_id: l.loop_id,
                processor_id: l.processor_id,
            });
        }
    }
    Ok(())
}
