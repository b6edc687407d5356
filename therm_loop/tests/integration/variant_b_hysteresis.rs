//! Critical-offset family: T_max latch, max-cooling timer and the fixed
//! critical overshoot.

use therm_common::fixed::from_whole;
use therm_common::hw::RunawayCause;
use therm_loop::env::ArrayKey;
use therm_loop::sim::PlatformEvent;

use super::support::{secs, LoopRig, CRITICAL};

// ── Helpers ──

/// Started critical rig commanding maximum cooling at `temp` °C.
fn saturated_rig(temp: i32) -> LoopRig {
    let mut rig = LoopRig::solo(CRITICAL, "");
    rig.start();
    rig.primary.preset(4000);
    rig.set_temp(temp);
    rig
}

fn latched(rig: &LoopRig) -> bool {
    rig.env.array_flag_for_owner(ArrayKey::InternalOvertemp, 1)
}

// ── Tests ──

#[test]
fn reaching_t_max_exactly_does_not_latch() {
    let mut rig = saturated_rig(75);
    let outcome = rig.fan.deadline_passed(secs(1));
    assert!(!outcome.env_changed);
    assert!(!latched(&rig));
}

#[test]
fn thirty_seconds_at_max_cooling_is_runaway() {
    let mut rig = saturated_rig(76);

    // First interval above T_max only latches.
    let outcome = rig.fan.deadline_passed(secs(1));
    assert!(outcome.env_changed);
    assert!(latched(&rig));
    assert_eq!(rig.fan.seconds_at_max_cooling(), 0);

    for t in 2..=30 {
        let outcome = rig.fan.deadline_passed(secs(t));
        assert_eq!(outcome.runaway, None, "t = {t}");
        assert_eq!(rig.fan.seconds_at_max_cooling(), (t - 1) as u32);
        assert_eq!(rig.fan.primary_target(), 4000);
    }

    let outcome = rig.fan.deadline_passed(secs(31));
    assert_eq!(outcome.runaway, Some(RunawayCause::MaxCoolingTimeout));
    let events = rig.platform.events();
    let PlatformEvent::Diagnostics(snapshot) = &events[0] else {
        panic!("expected diagnostics first: {events:?}");
    };
    assert_eq!(snapshot.seconds_at_max_cooling, 30);
    assert_eq!(snapshot.primary_target, 4000);
    assert_eq!(rig.platform.sleep_requests(), 1);
}

#[test]
fn dropping_to_t_max_resets_timer_and_unlatches() {
    let mut rig = saturated_rig(76);
    for t in 1..=10 {
        rig.fan.deadline_passed(secs(t));
    }
    assert_eq!(rig.fan.seconds_at_max_cooling(), 9);

    rig.set_temp(75);
    let outcome = rig.fan.deadline_passed(secs(11));

    assert!(outcome.env_changed);
    assert!(!latched(&rig));
    assert_eq!(rig.fan.seconds_at_max_cooling(), 0);

    // A new excursion starts counting from zero.
    rig.set_temp(76);
    rig.fan.deadline_passed(secs(12));
    rig.fan.deadline_passed(secs(13));
    assert_eq!(rig.fan.seconds_at_max_cooling(), 1);
}

#[test]
fn below_max_cooling_time_is_not_counted() {
    let mut rig = LoopRig::solo(CRITICAL, "");
    rig.start();
    rig.primary.preset(2000);
    rig.set_temp(76);

    for t in 1..=40 {
        let outcome = rig.fan.deadline_passed(secs(t));
        assert_eq!(outcome.runaway, None);
    }

    assert!(latched(&rig));
    assert_eq!(rig.fan.seconds_at_max_cooling(), 0);
    assert!(rig.fan.primary_target() > 2000);
}

#[test]
fn critical_offset_is_eight_degrees() {
    let mut rig = saturated_rig(82);
    assert_eq!(rig.fan.deadline_passed(secs(1)).runaway, None);

    rig.set_temp(83);
    let outcome = rig.fan.deadline_passed(secs(2));
    assert_eq!(outcome.runaway, Some(RunawayCause::CriticalOvershoot));
    let events = rig.platform.events();
    assert!(matches!(&events[0], PlatformEvent::Diagnostics(s) if s.temperature == from_whole(83)));
}
