//! Dataset arbitration between calibration memory and configuration, as
//! seen through loop construction and the simulator.

use std::sync::Arc;

use therm_common::calibration::{ProcessorVariant, VersionError};
use therm_common::fixed::from_whole;
use therm_common::meta_state::MetaStateIndex;
use therm_loop::config::load_config_from_str;
use therm_loop::env::{EnvironmentStore, ScalarKey};
use therm_loop::error::{DatasetError, LoopError};
use therm_loop::sim::Simulation;

use super::support::{loop_config, rom, LoopRig, AVERAGING, CRITICAL};

// ── Helpers ──

/// Config dataset for the rig's bin: 2 s interval, target 65 °C.
fn dataset(bin: &str, version: Option<&str>) -> String {
    let version = version.map(|v| format!("version = {v}\n")).unwrap_or_default();
    format!(
        "[[datasets]]\n\
         bin_id = {bin}\n\
         {version}\
         interval = 2\n\
         g_p = 0x0010_0000\n\
         g_d = 0\n\
         g_r = 0\n\
         input_target = 0x0041_0000\n\
         input_max = 0x004B_0000\n\
         output_min = 500\n\
         output_max = 4000\n\
         history_len = 6\n\
         max_power = 0x0050_0000\n\
         power_adjustment = 0x0005_0000\n"
    )
}

const SAME_BIN: &str = "[0x12, 0x34, 0x56]";

fn build(variant: u8, extra: &str) -> Result<LoopRig, LoopError> {
    LoopRig::try_new(&loop_config(1, extra), &rom(variant), Arc::new(EnvironmentStore::new()))
}

fn dataset_error(result: Result<LoopRig, LoopError>) -> DatasetError {
    match result {
        Err(LoopError::Dataset { loop_id: 1, source }) => source,
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("construction should fail"),
    }
}

// ── Tests ──

#[test]
fn newer_config_dataset_wins() {
    // 1.0.3d1 in calibration memory, 1.0.4d0 in configuration.
    let rig = build(AVERAGING, &dataset(SAME_BIN, Some("0x0001_04d0"))).unwrap();

    assert_eq!(rig.fan.live().interval_sec(), 2);
    let full = rig.fan.live().full().unwrap();
    assert_eq!(full.input_target, from_whole(65));
    assert_eq!(rig.fan.history().len(), 6);
    // The monitor family always comes from calibration memory.
    assert_eq!(rig.fan.variant(), ProcessorVariant::Averaging);
    assert_eq!(rig.fan.meta_state_index(), Some(MetaStateIndex::Normal));
}

#[test]
fn older_or_equal_config_dataset_loses() {
    for version in ["0x0001_02f9", "0x0001_03d1", "0x0001_03d0"] {
        let rig = build(CRITICAL, &dataset(SAME_BIN, Some(version))).unwrap();
        assert_eq!(rig.fan.live().interval_sec(), 1, "version {version}");
        assert_eq!(rig.fan.live().full().unwrap().input_target, from_whole(40));
    }
}

#[test]
fn release_level_orders_before_revision() {
    // 1.0.3a0 beats 1.0.3d1 despite the lower revision.
    let rig = build(CRITICAL, &dataset(SAME_BIN, Some("0x0001_03a0"))).unwrap();
    assert_eq!(rig.fan.live().interval_sec(), 2);
}

#[test]
fn other_bin_is_ignored_even_when_newer() {
    let rig = build(CRITICAL, &dataset("[0x12, 0x34, 0x57]", Some("0x0009_00f0"))).unwrap();
    assert_eq!(rig.fan.live().interval_sec(), 1);
}

#[test]
fn invalid_level_nibble_fails_construction() {
    let err = dataset_error(build(CRITICAL, &dataset(SAME_BIN, Some("0x0001_0031"))));
    assert_eq!(
        err,
        DatasetError::VersionComparisonFailed(VersionError::InvalidLevel {
            raw: 0x0001_0031,
            level: 3,
        })
    );
}

#[test]
fn unversioned_matching_dataset_fails_construction() {
    let err = dataset_error(build(CRITICAL, &dataset(SAME_BIN, None)));
    assert_eq!(err, DatasetError::VersionComparisonFailed(VersionError::Missing));
}

#[test]
fn processor_without_calibration_flags_system_uncalibrated() {
    let text = r#"
        [shared]
        service_name = "therm-uncal"

        [[loops]]
        loop_id = 0
        processor_id = 0
        actuator_ids = [16, 17]
        sensor_ids = [1, 2, 3, 4]

        [loops.overtemp]
        interval = 1
        output_override = 3500

        [[loops]]
        loop_id = 1
        processor_id = 1
        actuator_ids = [18, 19]
        sensor_ids = [5, 6, 7, 8]

        [[simulation.plants]]
        processor_id = 0

        [simulation.plants.calibration]
        bin_id = [0x12, 0x34, 0x56]
        version = 0x0001_03d1
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

        [[simulation.plants]]
        processor_id = 1
    "#;
    let cfg = load_config_from_str(text).unwrap();
    let mut sim = Simulation::build(&cfg).unwrap();

    assert_eq!(sim.group().len(), 1);
    assert!(sim.group().get(1).is_none());
    assert_eq!(sim.group().env().get(ScalarKey::SystemUncalibrated), Some(1));

    sim.register_devices();
    let fan = sim.group().get(0).unwrap();
    assert_eq!(fan.meta_state_index(), Some(MetaStateIndex::Overtemp));
    assert_eq!(fan.primary_target(), 3500);
}
