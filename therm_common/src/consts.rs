//! System-wide constants for the thermal control workspace.
//!
//! Single source of truth for fixed hardware characterization values,
//! calibration-memory offsets and configuration bounds.

use static_assertions::const_assert;

// ─── Meta-state bounds ──────────────────────────────────────────────

/// Smallest accepted control interval [s].
pub const INTERVAL_SEC_MIN: u32 = 1;

/// Largest accepted control interval [s].
pub const INTERVAL_SEC_MAX: u32 = 300;

/// Interval used for the calibration-memory dataset, which does not store one [s].
pub const ROM_INTERVAL_SEC: u32 = 1;

/// Minimum sample-history length (two points are needed for a derivative).
pub const HISTORY_LEN_MIN: usize = 2;

// ─── Secondary actuator ─────────────────────────────────────────────

/// Secondary actuator scaling factor when none is configured (1.0 in 16.16).
pub const DEFAULT_INTAKE_SCALING: u32 = 0x0001_0000;

// ─── Processor variant codes ────────────────────────────────────────

/// Variant byte values that select the averaging-aware safety monitor.
pub const AVERAGING_VARIANT_CODES: [u8; 2] = [0x02, 0x23];

// ─── Critical (legacy) safety monitor ───────────────────────────────

/// Overshoot above T_max that forces sleep immediately (8 °C, 16.16).
pub const CRITICAL_TEMP_OFFSET: i32 = 8 << 16;

/// Seconds at maximum cooling above T_max before sleep is forced.
pub const MAX_COOLING_LIMIT_SEC: u32 = 30;

// ─── Averaging safety monitor defaults ──────────────────────────────

/// Rolling-average window length [samples].
pub const DEFAULT_AVERAGE_SAMPLE_COUNT: usize = 180;

/// Rolling average above T_max + this offset enters low-power mode [°C].
pub const DEFAULT_SLEW_AVERAGE_OFFSET: i32 = 0;

/// Instantaneous reading above T_max + this offset enters low-power mode [°C].
pub const DEFAULT_SLEW_OFFSET: i32 = 2;

/// Instantaneous reading above T_max + this offset is thermal runaway [°C].
pub const DEFAULT_SLEEP_OFFSET: i32 = 8;

/// Intervals of forced full cooling after leaving low-power mode.
pub const RELEASE_AFTER_SLEW_INTERVALS: u32 = 1;

// ─── Scheduling ─────────────────────────────────────────────────────

/// First-deadline stagger per loop identifier [µs].
pub const STAGGER_PER_LOOP_US: u64 = 100;

/// Default configuration file path for the simulator binary.
pub const DEFAULT_CONFIG_PATH: &str = "config/therm.toml";

// ─── Ordering checks ────────────────────────────────────────────────

const_assert!(INTERVAL_SEC_MIN >= 1);
const_assert!(INTERVAL_SEC_MIN <= ROM_INTERVAL_SEC && ROM_INTERVAL_SEC <= INTERVAL_SEC_MAX);
const_assert!(HISTORY_LEN_MIN >= 2);
const_assert!(DEFAULT_SLEW_AVERAGE_OFFSET <= DEFAULT_SLEW_OFFSET);
const_assert!(DEFAULT_SLEW_OFFSET < DEFAULT_SLEEP_OFFSET);
const_assert!((CRITICAL_TEMP_OFFSET >> 16) == 8 && (CRITICAL_TEMP_OFFSET & 0xFFFF) == 0);
