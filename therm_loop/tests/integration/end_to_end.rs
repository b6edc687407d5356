//! Full control cycles: sampling, PID step and dispatch, then a closed-loop
//! run of the simulator against a thermal plant.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use therm_loop::config::load_config_from_str;
use therm_loop::schedule::LoopPhase;
use therm_loop::sim::Simulation;

use super::support::{secs, LoopRig, CRITICAL};

// ── Helpers ──

const CLOSED_LOOP: &str = r#"
    [shared]
    service_name = "therm-e2e"

    [[loops]]
    loop_id = 0
    processor_id = 0
    actuator_ids = [16, 17]
    sensor_ids = [1, 2, 3, 4]

    [simulation]
    tick_ms = 100
    sleep_sec = 10

    [[simulation.plants]]
    processor_id = 0
    load = [{ at_sec = 0.0, watts = 20.0 }]

    [simulation.plants.calibration]
    bin_id = [0x12, 0x34, 0x56]
    version = 0x0001_03d1
    g_p = 0x0040_0000
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

// ── Tests ──

#[test]
fn first_cycle_sends_minimum_and_goes_steady() {
    let mut rig = LoopRig::solo(CRITICAL, "");
    assert_eq!(rig.fan.phase(), LoopPhase::AwaitingRegistration);

    rig.start();

    assert_eq!(rig.fan.phase(), LoopPhase::Steady);
    assert_eq!(rig.primary.sent(), vec![0]);
    assert_eq!(rig.secondary.sent(), vec![0]);
    // Loop 1 staggered by 100 µs, 1 s interval.
    assert_eq!(rig.fan.deadline(), Some(Duration::from_micros(1_000_100)));
}

#[test]
fn two_degrees_over_target_raises_fan_by_two() {
    // Temperatures [42, 42], target 40, unit proportional gain.
    let mut rig = LoopRig::solo(CRITICAL, "intake_scaling = 0x8000");
    rig.start();
    rig.primary.preset(50);

    let outcome = rig.fan.deadline_passed(secs(1));

    assert!(outcome.ran);
    assert!(!outcome.env_changed);
    assert_eq!(rig.fan.primary_target(), 52);
    assert_eq!(rig.primary.sent().last(), Some(&52));
    // Secondary follows at half scale.
    assert_eq!(rig.fan.secondary_target(), 26);
}

#[test]
fn below_target_lowers_fan_and_respects_minimum() {
    let mut rig = LoopRig::solo(CRITICAL, "");
    rig.start();
    rig.primary.preset(10);
    rig.set_temp(30);

    rig.fan.deadline_passed(secs(1));

    // 10 - 10 = 0, already at the minimum.
    assert_eq!(rig.fan.primary_target(), 0);
    rig.primary.preset(25);
    rig.fan.deadline_passed(secs(2));
    assert_eq!(rig.fan.primary_target(), 15);
}

#[test]
fn unchanged_target_is_not_resent() {
    let mut rig = LoopRig::solo(CRITICAL, "");
    rig.start();
    rig.set_temp(40);
    let before = rig.primary.sent().len();

    for n in 1..=3 {
        rig.fan.deadline_passed(secs(n));
    }

    assert_eq!(rig.primary.sent().len(), before);
    // Secondary only follows a primary attempt.
    assert_eq!(rig.secondary.sent().len(), 1);
}

#[test]
fn steady_deadlines_advance_from_previous_deadline() {
    let mut rig = LoopRig::solo(CRITICAL, "");
    rig.start();
    let first = rig.fan.deadline().expect("armed");

    // Late firing does not shift the schedule.
    rig.fan.deadline_passed(first + Duration::from_millis(300));

    assert_eq!(rig.fan.deadline(), Some(first + secs(1)));
}

#[test]
fn closed_loop_settles_near_target() {
    let cfg = load_config_from_str(CLOSED_LOOP).unwrap();
    let mut sim = Simulation::build(&cfg).unwrap();
    let report = sim.register_devices();
    assert_eq!(report.fired, vec![0]);

    let stop = AtomicBool::new(false);
    let summary = sim.run(secs(900), 0.0, &stop);

    assert_eq!(summary.ticks, 9000);
    assert_eq!(summary.runaways, 0);
    assert_eq!(summary.sleeps, 0);

    let temp = sim.plant(0).unwrap().temperature_c();
    // Uncontrolled equilibrium would be 65 °C.
    assert!((35.0..45.0).contains(&temp), "settled at {temp}");
    let fan = sim.group().get(0).unwrap();
    assert!(fan.primary_target() > 0 && fan.primary_target() < 4000);
}

#[test]
fn stop_flag_ends_run_immediately() {
    let cfg = load_config_from_str(CLOSED_LOOP).unwrap();
    let mut sim = Simulation::build(&cfg).unwrap();
    sim.register_devices();

    let stop = AtomicBool::new(true);
    let summary = sim.run(secs(60), 0.0, &stop);

    assert_eq!(summary.ticks, 0);
    assert_eq!(summary.elapsed, Duration::ZERO);
}
