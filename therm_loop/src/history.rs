//! Owned sample buffers: power history, temperature pair, averaging window.
//!
//! Every buffer is a plain `Vec` replaced wholesale on resize, addressed by
//! index arithmetic. Resizes happen inside `&mut self`, so a reader never
//! observes a half-built buffer.

use therm_common::consts::HISTORY_LEN_MIN;
use therm_common::fixed::SensorValue;

// ─── Sample history ─────────────────────────────────────────────────

/// One power sample and its error from the power ceiling, both 16.16.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplePoint {
    pub sample: SensorValue,
    pub error: SensorValue,
}

/// Circular power history. Logical index 0 is the newest sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleHistory {
    points: Vec<SamplePoint>,
    latest: usize,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(HISTORY_LEN_MIN)
    }
}

impl SampleHistory {
    /// Zeroed history of at least [`HISTORY_LEN_MIN`] points.
    pub fn new(len: usize) -> Self {
        Self {
            points: vec![SamplePoint::default(); len.max(HISTORY_LEN_MIN)],
            latest: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Move the cursor one slot back (wrapping). The slot keeps its old
    /// contents until [`SampleHistory::set_latest`].
    pub fn advance(&mut self) {
        self.latest = match self.latest {
            0 => self.points.len() - 1,
            n => n - 1,
        };
    }

    /// Overwrite the slot under the cursor.
    #[inline]
    pub fn set_latest(&mut self, point: SamplePoint) {
        self.points[self.latest] = point;
    }

    /// Advance and store a new point.
    pub fn push(&mut self, point: SamplePoint) {
        self.advance();
        self.set_latest(point);
    }

    /// Point `age` samples back from the newest.
    #[inline]
    pub fn at(&self, age: usize) -> SamplePoint {
        self.points[(self.latest + age) % self.points.len()]
    }

    /// Newest point.
    #[inline]
    pub fn latest(&self) -> SamplePoint {
        self.at(0)
    }

    /// Iterate newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = SamplePoint> + '_ {
        (0..self.points.len()).map(move |age| self.at(age))
    }

    /// Sum of errors over the whole history (wrapping, as the hardware does).
    pub fn error_sum(&self) -> SensorValue {
        self.points
            .iter()
            .fold(0i32, |acc, p| acc.wrapping_add(p.error))
    }

    /// Resize to `new_len` (clamped to the minimum).
    ///
    /// The newest `min(old, new)` points keep their logical positions, the
    /// rest are zeroed and the cursor returns to slot 0. A no-op when the
    /// length does not change.
    pub fn resize(&mut self, new_len: usize) {
        let new_len = new_len.max(HISTORY_LEN_MIN);
        if new_len == self.points.len() {
            return;
        }
        let mut points = vec![SamplePoint::default(); new_len];
        for (age, slot) in points.iter_mut().enumerate().take(self.points.len()) {
            *slot = self.at(age);
        }
        self.points = points;
        self.latest = 0;
    }
}

// ─── Temperature pair ───────────────────────────────────────────────

/// The two most recent primary temperatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemperatureHistory {
    slots: [SensorValue; 2],
    index: usize,
}

impl TemperatureHistory {
    /// Toggle the slot index and store `value` as the latest reading.
    #[inline]
    pub fn record(&mut self, value: SensorValue) {
        self.index ^= 1;
        self.slots[self.index] = value;
    }

    #[inline]
    pub const fn latest(&self) -> SensorValue {
        self.slots[self.index]
    }

    #[inline]
    pub const fn previous(&self) -> SensorValue {
        self.slots[self.index ^ 1]
    }
}

// ─── Averaging window ───────────────────────────────────────────────

/// Rolling mean of raw temperatures.
///
/// A sample count below two disables averaging and the mean follows the raw
/// reading. The ring is allocated on first use and reallocated whenever
/// the requested count changes, seeded with the current reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AveragingWindow {
    ring: Vec<SensorValue>,
    index: usize,
    mean: SensorValue,
}

impl AveragingWindow {
    /// Feed one reading and return the updated mean.
    pub fn push(&mut self, raw: SensorValue, sample_count: usize) -> SensorValue {
        if sample_count < 2 {
            self.ring.clear();
            self.index = 0;
            self.mean = raw;
            return self.mean;
        }

        if self.ring.len() != sample_count {
            self.ring = vec![raw; sample_count];
            self.index = 1 % sample_count;
            self.mean = raw;
            return self.mean;
        }

        self.ring[self.index] = raw;
        let sum: i64 = self.ring.iter().map(|&v| v as i64).sum();
        self.mean = (sum / sample_count as i64) as SensorValue;
        self.index = (self.index + 1) % sample_count;
        self.mean
    }

    #[inline]
    pub const fn mean(&self) -> SensorValue {
        self.mean
    }

    /// Allocated ring length (0 when disabled or unused).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.len()
    }
}
