//! Simulated sensors, actuators, calibration memory and platform.
//!
//! Each device reads or writes a shared probe. The plant model and tests
//! hold clones of the same probes to drive readings and observe targets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use therm_common::calibration::layout::{self, IMAGE_LEN};
use therm_common::calibration::RomField;
use therm_common::fixed::FRAC_BITS_16;
use therm_common::prelude::*;

// ─── Sensor probe ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ProbeState {
    value: SensorValue,
    registered: bool,
    fail_next: bool,
    forced_reads: u32,
}

/// Shared reading behind one or more simulated sensors.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    state: Arc<Mutex<ProbeState>>,
}

impl Probe {
    pub fn registered(value: SensorValue) -> Self {
        let probe = Self::unregistered(value);
        probe.set_registered(true);
        probe
    }

    pub fn unregistered(value: SensorValue) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProbeState {
                value,
                ..ProbeState::default()
            })),
        }
    }

    pub fn set(&self, value: SensorValue) {
        self.state.lock().value = value;
    }

    pub fn value(&self) -> SensorValue {
        self.state.lock().value
    }

    pub fn set_registered(&self, registered: bool) {
        self.state.lock().registered = registered;
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }

    /// Make the next bus read fail.
    pub fn fail_next(&self) {
        self.state.lock().fail_next = true;
    }

    /// Number of forced refreshes seen.
    pub fn forced_reads(&self) -> u32 {
        self.state.lock().forced_reads
    }

    fn read(&self, id: u32, forced: bool) -> Result<SensorValue, HwError> {
        let mut s = self.state.lock();
        if !s.registered {
            return Err(HwError::NotRegistered(id));
        }
        if forced {
            s.forced_reads += 1;
        }
        if std::mem::take(&mut s.fail_next) {
            return Err(HwError::Transaction(format!("sensor {id} read timed out")));
        }
        Ok(s.value)
    }
}

/// Sensor backed by a probe.
#[derive(Debug)]
pub struct SimSensor {
    id: u32,
    probe: Probe,
}

impl SimSensor {
    pub fn new(id: u32, probe: Probe) -> Self {
        Self { id, probe }
    }
}

impl Sensor for SimSensor {
    fn id(&self) -> u32 {
        self.id
    }

    fn is_registered(&self) -> bool {
        self.probe.is_registered()
    }

    fn current_value(&self) -> SensorValue {
        self.probe.value()
    }

    fn fetch_current_value(&mut self) -> Result<SensorValue, HwError> {
        self.probe.read(self.id, false)
    }

    fn force_and_fetch(&mut self) -> Result<SensorValue, HwError> {
        self.probe.read(self.id, true)
    }
}

/// Power computed as `(voltage × current) >> 16` from two probes.
#[derive(Debug)]
pub struct DerivedPowerSensor {
    id: u32,
    voltage: Probe,
    current: Probe,
    cached: SensorValue,
}

impl DerivedPowerSensor {
    pub fn new(id: u32, voltage: Probe, current: Probe) -> Self {
        Self {
            id,
            voltage,
            current,
            cached: 0,
        }
    }

    fn compute(&mut self) -> Result<SensorValue, HwError> {
        let product = (self.voltage.value() as i64 * self.current.value() as i64) >> FRAC_BITS_16;
        self.cached = product.clamp(i32::MIN as i64, i32::MAX as i64) as SensorValue;
        Ok(self.cached)
    }
}

impl Sensor for DerivedPowerSensor {
    fn id(&self) -> u32 {
        self.id
    }

    fn is_registered(&self) -> bool {
        self.voltage.is_registered() && self.current.is_registered()
    }

    fn current_value(&self) -> SensorValue {
        self.cached
    }

    fn fetch_current_value(&mut self) -> Result<SensorValue, HwError> {
        self.compute()
    }

    fn force_and_fetch(&mut self) -> Result<SensorValue, HwError> {
        self.compute()
    }
}

// ─── Actuator probe ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ActuatorState {
    registered: bool,
    target: ControlValue,
    sent: Vec<ControlValue>,
    fail_next: bool,
}

/// Shared state behind a simulated actuator.
#[derive(Debug, Clone, Default)]
pub struct ActuatorProbe {
    state: Arc<Mutex<ActuatorState>>,
}

impl ActuatorProbe {
    pub fn registered() -> Self {
        let probe = Self::default();
        probe.set_registered(true);
        probe
    }

    pub fn unregistered() -> Self {
        Self::default()
    }

    pub fn set_registered(&self, registered: bool) {
        self.state.lock().registered = registered;
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }

    /// Last accepted target.
    pub fn target(&self) -> ControlValue {
        self.state.lock().target
    }

    /// Set the accepted target without recording a send.
    pub fn preset(&self, target: ControlValue) {
        self.state.lock().target = target;
    }

    /// Every accepted target, oldest first.
    pub fn sent(&self) -> Vec<ControlValue> {
        self.state.lock().sent.clone()
    }

    /// Make the next send fail.
    pub fn fail_next(&self) {
        self.state.lock().fail_next = true;
    }
}

/// Actuator backed by a probe.
#[derive(Debug)]
pub struct SimActuator {
    id: u32,
    probe: ActuatorProbe,
}

impl SimActuator {
    pub fn new(id: u32, probe: ActuatorProbe) -> Self {
        Self { id, probe }
    }
}

impl Actuator for SimActuator {
    fn id(&self) -> u32 {
        self.id
    }

    fn is_registered(&self) -> bool {
        self.probe.is_registered()
    }

    fn target(&self) -> ControlValue {
        self.probe.target()
    }

    fn send_target(&mut self, value: ControlValue) -> Result<(), HwError> {
        let mut s = self.probe.state.lock();
        if !s.registered {
            return Err(HwError::NotRegistered(self.id));
        }
        if std::mem::take(&mut s.fail_next) {
            return Err(HwError::Transaction(format!("actuator {} write nak", self.id)));
        }
        s.target = value;
        s.sent.push(value);
        Ok(())
    }
}

// ─── Calibration memory ─────────────────────────────────────────────

/// Calibration-memory contents in engineering form.
///
/// Temperatures and powers are whole units, gains 12.20.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RomContents {
    pub bin_id: [u8; 3],
    pub version: u32,
    pub g_p: i32,
    pub g_r: i32,
    pub g_d: i32,
    pub output_min: u16,
    pub output_max: u16,
    pub history_len: u8,
    pub target_temp: u8,
    pub max_temp: u8,
    pub max_power: u8,
    pub power_adjustment: u8,
    pub processor_variant: u8,
}

impl RomContents {
    /// Lay the contents out as a raw big-endian image.
    pub fn to_image(&self) -> Vec<u8> {
        let mut image = vec![0u8; IMAGE_LEN];
        let mut put = |field: RomField, bytes: &[u8]| {
            let start = field.offset as usize;
            image[start..start + field.len].copy_from_slice(bytes);
        };
        put(layout::BIN_ID, &self.bin_id);
        put(layout::VERSION, &self.version.to_be_bytes());
        put(layout::G_P, &self.g_p.to_be_bytes());
        put(layout::G_R, &self.g_r.to_be_bytes());
        put(layout::G_D, &self.g_d.to_be_bytes());
        put(layout::OUTPUT_MIN, &self.output_min.to_be_bytes());
        put(layout::OUTPUT_MAX, &self.output_max.to_be_bytes());
        put(layout::HISTORY_LEN, &[self.history_len]);
        put(layout::TARGET_TEMP, &[self.target_temp]);
        put(layout::MAX_TEMP, &[self.max_temp]);
        put(layout::MAX_POWER, &[self.max_power]);
        put(layout::POWER_ADJUSTMENT, &[self.power_adjustment]);
        put(layout::PROCESSOR_VARIANT, &[self.processor_variant]);
        image
    }
}

/// In-memory calibration images keyed by processor id.
#[derive(Debug, Clone, Default)]
pub struct SimCalibrationMemory {
    images: HashMap<u32, Vec<u8>>,
    failing_offset: Option<u16>,
}

impl SimCalibrationMemory {
    pub fn with_image(processor_id: u32, contents: &RomContents) -> Self {
        let mut mem = Self::default();
        mem.insert(processor_id, contents);
        mem
    }

    pub fn insert(&mut self, processor_id: u32, contents: &RomContents) {
        self.images.insert(processor_id, contents.to_image());
    }

    /// Make every read starting at `offset` fail.
    pub fn failing_at(mut self, offset: u16) -> Self {
        self.failing_offset = Some(offset);
        self
    }
}

impl CalibrationMemory for SimCalibrationMemory {
    fn read(&self, processor_id: u32, offset: u16, buf: &mut [u8]) -> Result<(), HwError> {
        if self.failing_offset == Some(offset) {
            return Err(HwError::Transaction(format!(
                "calibration read at {offset:#x} failed"
            )));
        }
        let image = self.images.get(&processor_id).ok_or_else(|| {
            HwError::Transaction(format!("processor {processor_id} has no calibration memory"))
        })?;
        let start = offset as usize;
        let src = image
            .get(start..start + buf.len())
            .ok_or(HwError::OutOfRange { offset, len: buf.len() })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

// ─── Platform ───────────────────────────────────────────────────────

/// Platform action observed by [`RecordingPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    Diagnostics(DiagnosticSnapshot),
    SleepRequested,
}

/// Platform that logs and records every action.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    events: Mutex<Vec<PlatformEvent>>,
    pending_sleep: Mutex<bool>,
}

impl RecordingPlatform {
    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().clone()
    }

    pub fn sleep_requests(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, PlatformEvent::SleepRequested))
            .count()
    }

    /// Consume a pending sleep request.
    pub fn take_sleep_request(&self) -> bool {
        std::mem::take(&mut *self.pending_sleep.lock())
    }
}

impl Platform for RecordingPlatform {
    fn request_sleep(&self) {
        warn!("host sleep requested");
        *self.pending_sleep.lock() = true;
        self.events.lock().push(PlatformEvent::SleepRequested);
    }

    fn dump_diagnostics(&self, snapshot: &DiagnosticSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(json) => error!(diagnostics = %json, "thermal runaway diagnostics"),
            Err(e) => error!(error = %e, ?snapshot, "thermal runaway diagnostics"),
        }
        self.events
            .lock()
            .push(PlatformEvent::Diagnostics(snapshot.clone()));
    }
}
