//! Therm Common Library
//!
//! Shared constants, fixed-point helpers, calibration types and
//! configuration loading for the CPU thermal control workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Hardware characterization values and configuration bounds
//! - [`fixed`] - 16.16 / 12.20 / 28.36 fixed-point helpers
//! - [`calibration`] - Calibration records, packed versions, memory layout
//! - [`meta_state`] - Candidate parameter sets
//! - [`loop_config`] - Typed per-loop configuration
//! - [`hw`] - Sensor, actuator, calibration-memory and platform traits
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use therm_common::prelude::*;
//! use therm_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod calibration;
pub mod config;
pub mod consts;
pub mod fixed;
pub mod hw;
pub mod loop_config;
pub mod meta_state;
pub mod prelude;
