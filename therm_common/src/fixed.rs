//! Fixed-point helpers.
//!
//! Sensor values are signed 16.16. Gains are signed 12.20, so a gain times a
//! sensor value is a 28.36 product held in an `i64`. Actuator scaling factors
//! are unsigned 16.16.

/// Signed 16.16 fixed-point sensor value.
pub type SensorValue = i32;

/// Actuator target (RPM or PWM units).
pub type ControlValue = u32;

/// Fraction bits of a 16.16 value.
pub const FRAC_BITS_16: u32 = 16;

/// Fraction bits of a 12.20 gain.
pub const FRAC_BITS_20: u32 = 20;

/// Fraction bits of a 28.36 product.
pub const FRAC_BITS_36: u32 = 36;

/// 1.0 in 16.16.
pub const ONE_16_16: i32 = 1 << FRAC_BITS_16;

/// Convert whole units (°C, W) to 16.16.
#[inline]
pub const fn from_whole(units: i32) -> SensorValue {
    units << FRAC_BITS_16
}

/// Convert a single calibration byte to 16.16.
#[inline]
pub const fn from_byte(byte: u8) -> SensorValue {
    (byte as i32) << FRAC_BITS_16
}

/// Integer part of a 16.16 value (arithmetic shift, rounds toward −∞).
#[inline]
pub const fn whole(value: SensorValue) -> i32 {
    value >> FRAC_BITS_16
}

/// Fractional part of a 16.16 value in thousandths, for log output.
#[inline]
pub const fn frac_millis(value: SensorValue) -> u32 {
    ((value as u32 & 0xFFFF) * 1000) >> FRAC_BITS_16
}

/// 12.20 gain × 16.16 value → 28.36 product.
#[inline]
pub const fn gain_product(gain: i32, value: SensorValue) -> i64 {
    gain as i64 * value as i64
}

/// Drop the 36 fraction bits of a 28.36 accumulator.
#[inline]
pub const fn truncate_28_36(accum: i64) -> i64 {
    accum >> FRAC_BITS_36
}

/// Reduce a 28.36 product to 16.16 (shift by 20, keep the low 32 bits).
#[inline]
pub const fn reduce_to_16_16(product: i64) -> SensorValue {
    (product >> FRAC_BITS_20) as i32
}

/// Scale an actuator value by a 16.16 factor: `(value × factor) >> 16`.
///
/// Computed in 64 bits and saturated to `u32::MAX`.
#[inline]
pub fn scale_16_16(value: ControlValue, factor: u32) -> ControlValue {
    let scaled = (value as u64 * factor as u64) >> FRAC_BITS_16;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Decode a big-endian signed 32-bit calibration field (gain).
#[inline]
pub const fn gain_from_be(bytes: [u8; 4]) -> i32 {
    i32::from_be_bytes(bytes)
}

/// Decode a big-endian unsigned 32-bit calibration field (version).
#[inline]
pub const fn word_from_be(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Decode a big-endian unsigned 16-bit calibration field (output bound).
#[inline]
pub const fn half_from_be(bytes: [u8; 2]) -> u32 {
    u16::from_be_bytes(bytes) as u32
}
