//! Thermal runaway: diagnostics, then exactly one host sleep request per
//! episode, suspension, and a fresh episode after wake.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use therm_common::fixed::from_whole;
use therm_common::hw::RunawayCause;
use therm_common::meta_state::MetaStateIndex;
use therm_loop::config::load_config_from_str;
use therm_loop::env::{EnvironmentStore, ScalarKey};
use therm_loop::schedule::LoopPhase;
use therm_loop::sim::{PlatformEvent, Simulation};

use super::support::{loop_config, rom, secs, LoopRig, AVERAGING, CRITICAL};

// ── Helpers ──

const IDLE_HOST: &str = r#"
    [shared]
    service_name = "therm-runaway"

    [[loops]]
    loop_id = 0
    processor_id = 0
    actuator_ids = [16, 17]
    sensor_ids = [1, 2, 3, 4]

    [simulation]
    tick_ms = 100
    sleep_sec = 60

    [[simulation.plants]]
    processor_id = 0

    [simulation.plants.calibration]
    bin_id = [0x00, 0x0A, 0x01]
    version = 0x0002_00f0
    g_p = 0x0010_0000
    g_r = 0
    g_d = 0
    output_min = 0
    output_max = 4000
    history_len = 4
    target_temp = 40
    max_temp = 75
    max_power = 80
    power_adjustment = 5
    processor_variant = 0x01
"#;

fn idle_sim() -> Simulation {
    let cfg = load_config_from_str(IDLE_HOST).unwrap();
    let mut sim = Simulation::build(&cfg).unwrap();
    sim.register_devices();
    sim
}

/// Step until a runaway is reported, at most `max_ticks` ticks.
fn step_until_runaway(sim: &mut Simulation, max_ticks: usize) -> Vec<u32> {
    for _ in 0..max_ticks {
        let report = sim.step();
        if !report.runaways.is_empty() {
            return report.runaways;
        }
    }
    Vec::new()
}

// ── Tests ──

#[test]
fn overshoot_dumps_diagnostics_then_sleeps_once() {
    let mut sim = idle_sim();
    sim.plant_mut(0).unwrap().set_temperature_c(90.0);

    assert_eq!(step_until_runaway(&mut sim, 20), vec![0]);

    let events = sim.platform().events();
    assert_eq!(events.len(), 2, "{events:?}");
    let PlatformEvent::Diagnostics(snapshot) = &events[0] else {
        panic!("diagnostics must come first: {events:?}");
    };
    assert_eq!(snapshot.loop_id, 0);
    assert_eq!(snapshot.cause, RunawayCause::CriticalOvershoot);
    assert_eq!(snapshot.input_max, from_whole(75));
    assert!(snapshot.temperature >= from_whole(83));
    assert_eq!(events[1], PlatformEvent::SleepRequested);

    assert!(sim.is_asleep());
    assert_eq!(sim.group().get(0).unwrap().phase(), LoopPhase::Suspended);
}

#[test]
fn host_cools_while_asleep_and_loop_resumes() {
    let mut sim = idle_sim();
    sim.plant_mut(0).unwrap().set_temperature_c(90.0);
    step_until_runaway(&mut sim, 20);

    let stop = AtomicBool::new(false);
    let summary = sim.run(secs(70), 0.0, &stop);

    assert!(!sim.is_asleep());
    assert_eq!(summary.sleeps, 1);
    assert_eq!(summary.runaways, 0);
    assert!(sim.plant(0).unwrap().temperature_c() < 75.0);
    let fan = sim.group().get(0).unwrap();
    assert_eq!(fan.phase(), LoopPhase::Steady);
}

#[test]
fn new_episode_after_wake_sleeps_again() {
    let mut sim = idle_sim();
    sim.plant_mut(0).unwrap().set_temperature_c(90.0);
    step_until_runaway(&mut sim, 20);
    let stop = AtomicBool::new(false);
    sim.run(secs(70), 0.0, &stop);
    assert_eq!(sim.platform().sleep_requests(), 1);

    sim.plant_mut(0).unwrap().set_temperature_c(95.0);

    assert_eq!(step_until_runaway(&mut sim, 20), vec![0]);
    assert_eq!(sim.platform().sleep_requests(), 2);
}

#[test]
fn suspended_loop_ignores_deadlines() {
    let mut rig = LoopRig::solo(CRITICAL, "");
    rig.start();
    rig.set_temp(84);

    let outcome = rig.fan.deadline_passed(secs(1));
    assert_eq!(outcome.runaway, Some(RunawayCause::CriticalOvershoot));
    assert_eq!(rig.fan.deadline(), None);

    let sent = rig.primary.sent().len();
    let again = rig.fan.deadline_passed(secs(2));
    assert!(!again.ran);
    assert_eq!(rig.platform.sleep_requests(), 1);
    assert_eq!(rig.primary.sent().len(), sent);
}

#[test]
fn wake_while_still_hot_starts_a_new_episode() {
    let mut rig = LoopRig::solo(CRITICAL, "");
    rig.start();
    rig.set_temp(84);
    rig.fan.deadline_passed(secs(1));

    rig.fan.will_sleep();
    rig.fan.did_wake(secs(30));
    assert_eq!(rig.fan.phase(), LoopPhase::PostWake);
    let deadline = rig.fan.deadline().expect("re-armed on wake");

    let outcome = rig.fan.deadline_passed(deadline);
    assert_eq!(outcome.runaway, Some(RunawayCause::CriticalOvershoot));
    assert_eq!(rig.platform.sleep_requests(), 2);
}

#[test]
fn averaging_family_sleeps_at_its_own_offset() {
    let mut rig = LoopRig::solo(AVERAGING, "[averaging]\nsample_count = 1\nsleep_offset = 6");
    rig.start();
    rig.set_temp(82);

    let outcome = rig.fan.deadline_passed(secs(1));

    // 82 ≥ 75 + 2 enters low-power mode and 82 ≥ 75 + 6 sleeps.
    assert!(outcome.env_changed);
    assert_eq!(outcome.runaway, Some(RunawayCause::CriticalOvershoot));
    let events = rig.platform.events();
    assert!(matches!(events.as_slice(), [PlatformEvent::Diagnostics(s), PlatformEvent::SleepRequested]
        if s.average_temperature == from_whole(82)));
}

#[test]
fn forced_override_start_still_sleeps_on_overshoot() {
    let mut rig = LoopRig::solo(CRITICAL, "[forced]\ninterval = 1\noutput_override = 1500");
    assert_eq!(rig.fan.meta_state_index(), Some(MetaStateIndex::Forced));
    rig.start();
    assert_eq!(rig.primary.target(), 1500);
    rig.set_temp(90);

    let outcome = rig.fan.deadline_passed(secs(1));

    assert_eq!(outcome.runaway, Some(RunawayCause::CriticalOvershoot));
    let events = rig.platform.events();
    assert!(matches!(events.as_slice(), [PlatformEvent::Diagnostics(s), PlatformEvent::SleepRequested]
        if s.input_max == from_whole(75)));
    assert_eq!(rig.fan.phase(), LoopPhase::Suspended);
}

#[test]
fn uncalibrated_start_still_sleeps_on_overshoot() {
    let env = Arc::new(EnvironmentStore::new());
    env.set(ScalarKey::SystemUncalibrated, 7);
    let cfg = loop_config(1, "[overtemp]\ninterval = 1\noutput_override = 4000");
    let mut rig = LoopRig::new(&cfg, &rom(CRITICAL), env);
    assert_eq!(rig.fan.meta_state_index(), Some(MetaStateIndex::Overtemp));
    rig.start();
    rig.set_temp(120);

    let outcome = rig.fan.deadline_passed(secs(1));

    assert_eq!(outcome.runaway, Some(RunawayCause::CriticalOvershoot));
    assert_eq!(rig.platform.sleep_requests(), 1);
}
