//! Deadline scheduler: loop phase and next deadline.
//!
//! AwaitingRegistration → FirstAdjustment → Steady, PostWake after a host
//! wake, Suspended while the host sleeps. Deadlines are absolute
//! (`now + stagger + interval`) in FirstAdjustment and on the re-arm after a
//! wake, relative to the previous deadline otherwise.

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use tracing::{debug, info};

use therm_common::consts::STAGGER_PER_LOOP_US;

bitflags! {
    /// Devices a loop needs before it can run.
    ///
    /// The derived power sensor is computed from voltage and current and
    /// has no registration of its own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Registration: u8 {
        const TEMPERATURE        = 0b0000_0001;
        const VOLTAGE            = 0b0000_0010;
        const CURRENT            = 0b0000_0100;
        const PRIMARY_ACTUATOR   = 0b0000_1000;
        const SECONDARY_ACTUATOR = 0b0001_0000;
    }
}

impl Registration {
    #[inline]
    pub fn is_complete(self) -> bool {
        self.contains(Self::all())
    }

    /// Devices still outstanding.
    #[inline]
    pub fn missing(self) -> Self {
        Self::all().difference(self)
    }
}

/// Lifecycle phase of one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopPhase {
    /// Waiting for sensors and actuators.
    AwaitingRegistration,
    /// First cycle after registration: targets start from the minimum and
    /// are always sent.
    FirstAdjustment,
    /// Regular operation.
    Steady,
    /// First cycles after a host wake: targets are always sent.
    PostWake,
    /// Host asleep or sleep requested; no deadline armed.
    Suspended,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingRegistration => "awaiting-registration",
            Self::FirstAdjustment => "first-adjustment",
            Self::Steady => "steady",
            Self::PostWake => "post-wake",
            Self::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

/// Event driving a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Every required device is registered.
    AllRegistered,
    /// The primary actuator accepted a target.
    AdjustmentSent,
    /// Host is going to sleep (notified or requested by the loop).
    Suspend,
    /// Host woke up.
    Wake,
}

/// Result of a phase transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded, new phase.
    Ok(LoopPhase),
    /// Transition rejected, reason.
    Rejected(&'static str),
}

/// Phase and deadline of one loop.
#[derive(Debug, Clone)]
pub struct Scheduler {
    loop_id: u32,
    phase: LoopPhase,
    deadline: Option<Duration>,
}

impl Scheduler {
    pub const fn new(loop_id: u32) -> Self {
        Self {
            loop_id,
            phase: LoopPhase::AwaitingRegistration,
            deadline: None,
        }
    }

    #[inline]
    pub const fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Next armed deadline, if any.
    #[inline]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Whether the loop takes samples and adjusts controls.
    #[inline]
    pub const fn is_running(&self) -> bool {
        matches!(
            self.phase,
            LoopPhase::FirstAdjustment | LoopPhase::Steady | LoopPhase::PostWake
        )
    }

    /// Targets must be sent even when unchanged.
    #[inline]
    pub const fn forces_send(&self) -> bool {
        matches!(self.phase, LoopPhase::FirstAdjustment | LoopPhase::PostWake)
    }

    /// Per-loop offset of absolute deadlines.
    #[inline]
    pub fn stagger(&self) -> Duration {
        Duration::from_micros(STAGGER_PER_LOOP_US.saturating_mul(u64::from(self.loop_id)))
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: PhaseEvent) -> TransitionResult {
        use LoopPhase::*;
        use PhaseEvent::*;

        let next = match (self.phase, event) {
            (AwaitingRegistration, AllRegistered) => FirstAdjustment,

            (FirstAdjustment | PostWake | Steady, AdjustmentSent) => Steady,

            (FirstAdjustment | Steady | PostWake, Suspend) => Suspended,
            (Suspended, Suspend) => Suspended,

            (Suspended | Steady | FirstAdjustment | PostWake, Wake) => PostWake,

            (_, AllRegistered) => return TransitionResult::Rejected("already registered"),
            (AwaitingRegistration, _) => return TransitionResult::Rejected("devices not registered"),
            (Suspended, AdjustmentSent) => return TransitionResult::Rejected("loop suspended"),
        };

        if next != self.phase {
            debug!(loop_id = self.loop_id, from = %self.phase, to = %next, "loop phase change");
        }
        if matches!(event, Suspend | Wake) {
            self.deadline = None;
        }
        self.phase = next;
        TransitionResult::Ok(next)
    }

    /// Single all-registered transition, reached from both registration
    /// callbacks. Returns true only on the call that completes registration.
    pub fn mark_registered(&mut self, registered: Registration) -> bool {
        if self.phase != LoopPhase::AwaitingRegistration {
            return false;
        }
        if !registered.is_complete() {
            debug!(
                loop_id = self.loop_id,
                missing = ?registered.missing(),
                "waiting for device registration"
            );
            return false;
        }
        let ok = matches!(
            self.handle_event(PhaseEvent::AllRegistered),
            TransitionResult::Ok(_)
        );
        if ok {
            info!(loop_id = self.loop_id, "all devices registered");
        }
        ok
    }

    /// Arm the next deadline and return it. Nothing is armed unless the
    /// loop is running.
    ///
    /// Absolute (`now + stagger + interval`) while the first adjustment is
    /// pending or when no deadline is armed, `previous + interval` otherwise.
    pub fn arm_next(&mut self, now: Duration, interval_sec: u32) -> Option<Duration> {
        if !self.is_running() {
            self.deadline = None;
            return None;
        }
        let interval = Duration::from_secs(u64::from(interval_sec));
        let next = match self.deadline {
            Some(previous) if self.phase != LoopPhase::FirstAdjustment => previous + interval,
            _ => now + self.stagger() + interval,
        };
        self.deadline = Some(next);
        Some(next)
    }
}
