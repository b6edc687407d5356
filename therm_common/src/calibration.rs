//! Calibration records, packed dataset versions and the calibration-memory layout.
//!
//! A calibration record is either read from the processor's calibration
//! memory or supplied by configuration as an override. Both carry a packed
//! version that decides which one is authoritative.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

use crate::consts::{AVERAGING_VARIANT_CODES, ROM_INTERVAL_SEC};
use crate::fixed::{ControlValue, SensorValue};
use crate::meta_state::MetaStateRecord;

// ─── Bin identifier ─────────────────────────────────────────────────

/// Maximum length of a processor bin identifier.
pub const BIN_ID_CAPACITY: usize = 8;

/// Opaque manufacturing bin identifier.
pub type BinId = heapless::Vec<u8, BIN_ID_CAPACITY>;

// ─── Calibration-memory layout ──────────────────────────────────────

/// A fixed field in the calibration memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomField {
    /// Human-readable field name (for errors and logs).
    pub name: &'static str,
    /// Byte offset.
    pub offset: u16,
    /// Byte length.
    pub len: usize,
}

impl RomField {
    const fn new(name: &'static str, offset: u16, len: usize) -> Self {
        Self { name, offset, len }
    }
}

/// Calibration-memory field map.
pub mod layout {
    use super::RomField;

    pub const BIN_ID: RomField = RomField::new("bin-id", 0x08, 3);
    pub const VERSION: RomField = RomField::new("version", 0x04, 4);
    pub const G_P: RomField = RomField::new("G_p", 0x2C, 4);
    pub const G_R: RomField = RomField::new("G_r", 0x30, 4);
    pub const G_D: RomField = RomField::new("G_d", 0x34, 4);
    pub const OUTPUT_MIN: RomField = RomField::new("output-min", 0x50, 2);
    pub const OUTPUT_MAX: RomField = RomField::new("output-max", 0x52, 2);
    pub const HISTORY_LEN: RomField = RomField::new("history-length", 0x2B, 1);
    pub const TARGET_TEMP: RomField = RomField::new("target-temp", 0x28, 1);
    pub const MAX_TEMP: RomField = RomField::new("max-temp", 0x29, 1);
    pub const MAX_POWER: RomField = RomField::new("max-power", 0x2A, 1);
    pub const POWER_ADJUSTMENT: RomField = RomField::new("power-adjustment", 0x27, 1);
    pub const PROCESSOR_VARIANT: RomField = RomField::new("processor-variant", 0x0E, 1);

    /// Size of a calibration image that covers every field.
    pub const IMAGE_LEN: usize = 0x54;

    /// Every field, in read order.
    pub const ALL: [RomField; 13] = [
        BIN_ID,
        VERSION,
        G_P,
        G_R,
        G_D,
        OUTPUT_MIN,
        OUTPUT_MAX,
        HISTORY_LEN,
        TARGET_TEMP,
        MAX_TEMP,
        MAX_POWER,
        POWER_ADJUSTMENT,
        PROCESSOR_VARIANT,
    ];
}

const_assert!(layout::OUTPUT_MAX.offset as usize + layout::OUTPUT_MAX.len <= layout::IMAGE_LEN);
const_assert!(layout::BIN_ID.len <= BIN_ID_CAPACITY);

// ─── Packed version ─────────────────────────────────────────────────

/// Version comparison failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VersionError {
    /// One of the two candidates carries no version.
    #[error("dataset version missing")]
    Missing,

    /// The level nibble is not one of d, a, b, f.
    #[error("invalid version level nibble {level:#x} in {raw:#010x}")]
    InvalidLevel {
        /// Raw 32-bit version word.
        raw: u32,
        /// Offending level nibble.
        level: u8,
    },
}

/// Release level of a dataset version, ordered d < a < b < f.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum VersionLevel {
    Development = 0,
    Alpha = 1,
    Beta = 2,
    Final = 3,
}

impl VersionLevel {
    /// Map the packed level nibble (0xD, 0xA, 0xB, 0xF).
    #[inline]
    pub const fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0xD => Some(Self::Development),
            0xA => Some(Self::Alpha),
            0xB => Some(Self::Beta),
            0xF => Some(Self::Final),
            _ => None,
        }
    }

    #[inline]
    pub const fn letter(self) -> char {
        match self {
            Self::Development => 'd',
            Self::Alpha => 'a',
            Self::Beta => 'b',
            Self::Final => 'f',
        }
    }
}

/// 4-byte packed dataset version, `0xuuuMmVLR`.
///
/// Only the low 20 bits are significant: major, minor, very-minor, level
/// and revision nibbles. `0x000100d9` reads as `1.0.0d9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedVersion(pub u32);

impl PackedVersion {
    const SIGNIFICANT: u32 = 0x000F_FFFF;

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0 & Self::SIGNIFICANT
    }

    #[inline]
    pub const fn major(self) -> u8 {
        ((self.0 >> 16) & 0xF) as u8
    }

    #[inline]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    #[inline]
    pub const fn very_minor(self) -> u8 {
        ((self.0 >> 8) & 0xF) as u8
    }

    #[inline]
    pub const fn level_nibble(self) -> u8 {
        ((self.0 >> 4) & 0xF) as u8
    }

    #[inline]
    pub const fn revision(self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// Decoded level, or an error for nibbles outside d/a/b/f.
    pub const fn level(self) -> Result<VersionLevel, VersionError> {
        match VersionLevel::from_nibble(self.level_nibble()) {
            Some(level) => Ok(level),
            None => Err(VersionError::InvalidLevel {
                raw: self.0,
                level: self.level_nibble(),
            }),
        }
    }

    /// Compare two optional versions.
    ///
    /// Both operands must be present with valid levels, even when the
    /// remaining fields already decide the order.
    pub fn compare(
        a: Option<PackedVersion>,
        b: Option<PackedVersion>,
    ) -> Result<Ordering, VersionError> {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(VersionError::Missing),
        };
        let level_a = a.level()?;
        let level_b = b.level()?;

        Ok(a.major()
            .cmp(&b.major())
            .then(a.minor().cmp(&b.minor()))
            .then(a.very_minor().cmp(&b.very_minor()))
            .then(level_a.cmp(&level_b))
            .then(a.revision().cmp(&b.revision())))
    }
}

impl fmt::Display for PackedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level() {
            Ok(l) => l.letter(),
            Err(_) => '?',
        };
        write!(
            f,
            "{}.{}.{}{}{}",
            self.major(),
            self.minor(),
            self.very_minor(),
            level,
            self.revision()
        )
    }
}

// ─── Processor variant ──────────────────────────────────────────────

/// Safety-monitor family selected by the calibration variant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorVariant {
    /// Averaging-aware monitor with slew hysteresis.
    Averaging,
    /// Critical-offset monitor with the max-cooling timer.
    Critical,
}

impl ProcessorVariant {
    /// Classify a calibration variant byte.
    #[inline]
    pub fn from_code(code: u8) -> Self {
        if AVERAGING_VARIANT_CODES.contains(&code) {
            Self::Averaging
        } else {
            Self::Critical
        }
    }
}

// ─── Calibration record ─────────────────────────────────────────────

/// Where a calibration record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSource {
    /// Read from the processor calibration memory.
    Rom,
    /// Supplied by configuration.
    Config,
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rom => f.write_str("calibration memory"),
            Self::Config => f.write_str("configuration"),
        }
    }
}

/// A complete PID parameter set for one processor.
///
/// Temperatures and powers are 16.16; gains are 12.20.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationRecord {
    pub source: DatasetSource,
    pub bin_id: BinId,
    /// Packed version; configuration records may omit it.
    pub version: Option<PackedVersion>,
    pub g_p: i32,
    pub g_d: i32,
    pub g_r: i32,
    pub input_target: SensorValue,
    pub input_max: SensorValue,
    pub output_min: ControlValue,
    pub output_max: ControlValue,
    pub history_len: u32,
    pub max_power: SensorValue,
    pub power_adjustment: SensorValue,
    /// Raw variant byte (calibration memory only).
    pub processor_variant: Option<u8>,
    pub interval_sec: u32,
}

impl CalibrationRecord {
    /// Interval used when a record does not carry one.
    pub const DEFAULT_INTERVAL_SEC: u32 = ROM_INTERVAL_SEC;

    /// Full-mode meta-state for this record.
    pub fn to_meta_state(&self) -> MetaStateRecord {
        MetaStateRecord {
            interval: Some(self.interval_sec),
            output_override: None,
            g_p: Some(self.g_p),
            g_d: Some(self.g_d),
            g_r: Some(self.g_r),
            input_target: Some(self.input_target),
            input_max: Some(self.input_max),
            output_min: Some(self.output_min),
            output_max: Some(self.output_max),
            max_power: Some(self.max_power),
            power_adjustment: Some(self.power_adjustment),
            history_len: Some(self.history_len),
        }
    }
}
