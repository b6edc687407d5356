//! Loading the shipped configuration and configuration files from disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use tempfile::TempDir;

use therm_common::calibration::ProcessorVariant;
use therm_common::config::{ConfigError, LogLevel};
use therm_loop::config::{load_config, LoadError};
use therm_loop::sim::Simulation;

use super::support::secs;

// ── Helpers ──

fn shipped_config() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/therm.toml")
}

// ── Tests ──

#[test]
fn shipped_config_loads() {
    let cfg = load_config(&shipped_config()).unwrap();

    assert_eq!(cfg.shared().service_name, "therm-sim-01");
    assert_eq!(cfg.shared().log_level, LogLevel::Info);
    assert_eq!(cfg.loops().len(), 2);
    assert_eq!(cfg.loops()[0].intake_scaling, 0x0000_C000);
    assert_eq!(cfg.loops()[0].averaging.sample_count, 30);
    assert_eq!(cfg.simulation().sleep_sec, 30);
    assert!(cfg.plant(0).unwrap().calibration.is_some());
}

#[test]
fn shipped_config_runs_without_runaway() {
    let cfg = load_config(&shipped_config()).unwrap();
    let mut sim = Simulation::build(&cfg).unwrap();

    // Newer configuration dataset governs processor 0.
    let fan0 = sim.group().get(0).unwrap();
    assert_eq!(fan0.variant(), ProcessorVariant::Averaging);
    assert_eq!(fan0.live().interval_sec(), 2);
    assert_eq!(sim.group().get(1).unwrap().variant(), ProcessorVariant::Critical);

    sim.register_devices();
    let stop = AtomicBool::new(false);
    let summary = sim.run(secs(60), 0.0, &stop);

    assert_eq!(summary.runaways, 0);
    assert_eq!(summary.sleeps, 0);
    assert!(sim.group().iter().all(|l| l.primary_target() > 0));
}

#[test]
fn config_copied_to_disk_loads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("therm.toml");
    fs::copy(shipped_config(), &path).unwrap();

    let cfg = load_config(&path).unwrap();
    assert_eq!(cfg.loops()[1].description, "CPU1 pump");
}

#[test]
fn missing_file_reported() {
    let dir = TempDir::new().unwrap();
    let result = load_config(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(LoadError::Config(ConfigError::FileNotFound))));
}

#[test]
fn malformed_file_reported_as_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("therm.toml");
    fs::write(&path, "[shared\nservice_name = 1").unwrap();

    let result = load_config(&path);
    assert!(matches!(result, Err(LoadError::Config(ConfigError::ParseError(_)))));
}

#[test]
fn invalid_loop_reported_as_validation_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("therm.toml");
    let text = fs::read_to_string(shipped_config())
        .unwrap()
        .replace("actuator_ids = [18, 19]", "actuator_ids = [18, 18]");
    fs::write(&path, text).unwrap();

    let result = load_config(&path);
    assert!(matches!(result, Err(LoadError::Config(ConfigError::ValidationError(_)))));
}
