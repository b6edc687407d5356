//! # Thermal control loop
//!
//! Periodic fixed-point PID control of a CPU fan/pump pair with hard
//! thermal-safety limits.
//!
//! ## Pipeline (per interval)
//!
//! 1. **Sample**: primary temperature, forced voltage/current refresh,
//!    derived power, power error against the ceiling.
//! 2. **Safety**: variant-specific overtemp hysteresis and runaway
//!    detection against the shared environment.
//! 3. **Control**: incremental PID in 16.16 / 12.20 / 28.36 fixed point,
//!    primary target plus a scaled secondary target.
//! 4. **Schedule**: next absolute or relative deadline.
//!
//! Environment changes are fanned out by [`group::LoopGroup`] so every loop
//! re-selects its meta-state.

pub mod config;
pub mod control;
pub mod cpu_loop;
pub mod dataset;
pub mod env;
pub mod error;
pub mod group;
pub mod history;
pub mod meta;
pub mod safety;
pub mod sampler;
pub mod schedule;
pub mod sim;
