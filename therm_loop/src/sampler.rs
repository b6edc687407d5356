//! Per-interval sampling of temperature and power.

use tracing::{debug, warn};

use therm_common::fixed::{frac_millis, whole, SensorValue};
use therm_common::hw::{HwError, Sensor};

use crate::history::{AveragingWindow, SampleHistory, SamplePoint, TemperatureHistory};

/// The four sensors of one loop.
pub struct SensorSet {
    pub temperature: Box<dyn Sensor>,
    pub voltage: Box<dyn Sensor>,
    pub current: Box<dyn Sensor>,
    /// Derived sensor computed from voltage and current.
    pub power: Box<dyn Sensor>,
}

impl SensorSet {
    /// Ids in configuration order.
    pub fn ids(&self) -> [u32; 4] {
        [
            self.temperature.id(),
            self.voltage.id(),
            self.current.id(),
            self.power.id(),
        ]
    }
}

/// Temperature pair, averaging window and power history of one loop.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    temperatures: TemperatureHistory,
    /// `Some` only for the averaging monitor family.
    averaging: Option<AveragingWindow>,
    average_count: usize,
}

impl Sampler {
    /// Sampler with the averaging window enabled for `sample_count` readings.
    pub fn with_averaging(sample_count: usize) -> Self {
        Self {
            averaging: Some(AveragingWindow::default()),
            average_count: sample_count,
            ..Self::default()
        }
    }

    #[inline]
    pub const fn temperatures(&self) -> &TemperatureHistory {
        &self.temperatures
    }

    /// Rolling average, or the latest reading when averaging is off.
    #[inline]
    pub fn average(&self) -> SensorValue {
        match &self.averaging {
            Some(w) if self.average_count >= 2 => w.mean(),
            _ => self.temperatures.latest(),
        }
    }

    /// Take one sample into `history`.
    ///
    /// The temperature pair always advances. On a power read failure the
    /// history cursor has still moved but the slot keeps its old contents,
    /// and false is returned.
    pub fn acquire(
        &mut self,
        sensors: &mut SensorSet,
        history: &mut SampleHistory,
        power_ceiling: SensorValue,
    ) -> bool {
        let temp = sensors.temperature.current_value();
        self.temperatures.record(temp);

        if let Some(window) = self.averaging.as_mut() {
            let mean = window.push(temp, self.average_count);
            debug!(
                n = self.average_count,
                avg = format_args!("{}.{:03}", whole(mean), frac_millis(mean)),
                temp = format_args!("{}.{:03}", whole(temp), frac_millis(temp)),
                "averaging window"
            );
        }

        history.advance();
        match read_power(sensors) {
            Ok(power) => {
                history.set_latest(SamplePoint {
                    sample: power,
                    error: power_ceiling.wrapping_sub(power),
                });
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to acquire power sample");
                false
            }
        }
    }
}

fn read_power(sensors: &mut SensorSet) -> Result<SensorValue, HwError> {
    sensors.voltage.force_and_fetch()?;
    sensors.current.force_and_fetch()?;
    sensors.power.fetch_current_value()
}
