//! # therm_loop
//!
//! Runs the CPU fan/pump control loops against simulated thermal plants.
//! Loads one TOML file describing the loops and plants, registers the
//! simulated devices and drives the loop group on a simulated clock.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use therm_common::config::LogLevel;
use therm_common::consts::DEFAULT_CONFIG_PATH;
use therm_loop::config::{load_config, LoadError, LoadedConfig};
use therm_loop::sim::Simulation;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Thermal control loop simulator
#[derive(Parser, Debug)]
#[command(name = "therm_loop")]
#[command(version)]
#[command(about = "Fixed-point CPU fan/pump control loop on a simulated plant")]
struct Args {
    /// Path to the configuration TOML.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Simulated run time in seconds.
    #[arg(long, default_value_t = 600)]
    duration: u64,

    /// Wall-clock pacing factor (0 runs as fast as possible).
    #[arg(long, default_value_t = 0.0)]
    speedup: f64,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let loaded = load_config(&args.config);
    let configured = loaded
        .as_ref()
        .map(|c| c.shared().log_level)
        .unwrap_or_default();
    setup_tracing(&args, configured);

    info!("therm_loop v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, loaded) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("therm_loop shutdown complete");
}

fn run(
    args: &Args,
    loaded: Result<LoadedConfig, LoadError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = loaded?;
    info!(
        service = %loaded.shared().service_name,
        loops = loaded.loops().len(),
        plants = loaded.simulation().plants.len(),
        "Config OK"
    );

    let mut sim = Simulation::build(&loaded)?;
    sim.register_devices();

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        s.store(true, Ordering::SeqCst);
    })?;

    let summary = sim.run(Duration::from_secs(args.duration), args.speedup, &stop);
    info!(
        ticks = summary.ticks,
        elapsed_s = summary.elapsed.as_secs(),
        runaways = summary.runaways,
        sleeps = summary.sleeps,
        "simulation finished"
    );
    Ok(())
}

fn setup_tracing(args: &Args, configured: LogLevel) {
    let directive: Directive = if args.verbose {
        Level::DEBUG.into()
    } else {
        configured
            .as_directive()
            .parse()
            .unwrap_or_else(|_| Level::INFO.into())
    };

    let filter = EnvFilter::from_default_env().add_directive(directive);

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
