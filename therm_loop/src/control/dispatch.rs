//! Target dispatch to the primary and scaled secondary actuators.

use tracing::{debug, warn};

use therm_common::fixed::{scale_16_16, ControlValue};
use therm_common::hw::Actuator;

use crate::meta::OutputBounds;

/// The two actuators of one loop.
pub struct ActuatorPair {
    pub primary: Box<dyn Actuator>,
    /// Driven with a scaled copy of the primary target.
    pub secondary: Box<dyn Actuator>,
}

impl ActuatorPair {
    /// Ids in configuration order.
    pub fn ids(&self) -> [u32; 2] {
        [self.primary.id(), self.secondary.id()]
    }
}

/// What a dispatch attempt did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// A send was due (target changed or forced).
    pub attempted: bool,
    pub primary_sent: bool,
    pub secondary_sent: bool,
}

/// `clamp((primary × scaling) >> 16)` against the active bounds.
#[inline]
pub fn secondary_target(
    primary: ControlValue,
    scaling: u32,
    bounds: Option<OutputBounds>,
) -> ControlValue {
    let scaled = scale_16_16(primary, scaling);
    match bounds {
        Some(b) => b.clamp(scaled),
        None => scaled,
    }
}

/// Send `target` to the primary when it changed or `force` is set; the
/// secondary follows every primary send. Failures are logged only.
pub fn dispatch(
    actuators: &mut ActuatorPair,
    target: ControlValue,
    force: bool,
    scaling: u32,
    bounds: Option<OutputBounds>,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    if !force && target == actuators.primary.target() {
        return outcome;
    }
    outcome.attempted = true;

    match actuators.primary.send_target(target) {
        Ok(()) => outcome.primary_sent = true,
        Err(e) => warn!(id = actuators.primary.id(), target, error = %e, "failed to send primary target"),
    }

    let secondary = secondary_target(target, scaling, bounds);
    match actuators.secondary.send_target(secondary) {
        Ok(()) => outcome.secondary_sent = true,
        Err(e) => {
            warn!(id = actuators.secondary.id(), target = secondary, error = %e, "failed to send secondary target")
        }
    }

    debug!(primary = target, secondary, ?outcome, "targets dispatched");
    outcome
}
