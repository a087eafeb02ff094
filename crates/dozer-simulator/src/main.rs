//! Desktop simulator for the dozer deep-sleep sensor node.
//!
//! Every simulated wake starts from nothing but the state file, exactly like
//! a node coming out of deep sleep: the medium is reopened, collaborators are
//! rebuilt, and one cycle runs before the node "sleeps" again.
//!
//! ```text
//! RUST_LOG=info dozer-simulator --cycles 40 --drop-every 7 --glitch-every 5
//! ```

mod file_storage;
mod node;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use embassy_futures::block_on;
use log::{error, info};

use dozer_core::config::{FailedPublishPolicy, NodeConfig};
use dozer_core::cycle::{CycleController, CycleError, run_wake_cycle};
use dozer_core::persistence::DurableStore;
use dozer_core::sensors::{NodeSensors, SentinelFilter};

use file_storage::FileStorage;
use node::{HostDelay, LoopbackBroker, SimulatedPower, SyntheticProbe, SyntheticSupply};

/// Room for the encoded provisioning blob.
const CONFIG_BLOB_CAPACITY: usize = 512;

#[derive(Parser, Debug)]
#[command(name = "dozer-simulator", version, about)]
struct Args {
    /// File holding the node's persisted EEPROM image.
    #[arg(long, default_value = "dozer-state.bin")]
    state: PathBuf,

    /// Number of wake cycles to run.
    #[arg(short = 'n', long, default_value_t = 20)]
    cycles: u32,

    /// Postcard provisioning blob to run with instead of the compiled config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration as a postcard blob and exit.
    #[arg(long)]
    export_config: Option<PathBuf>,

    /// Refuse broker connections on every Nth wake.
    #[arg(long)]
    drop_every: Option<u32>,

    /// Return the DS18B20 power-on value on every Nth wake.
    #[arg(long)]
    glitch_every: Option<u32>,

    /// Wall-clock milliseconds to pause per simulated sleep.
    #[arg(long)]
    pace_ms: Option<u64>,

    /// Delete the state file before the first wake.
    #[arg(long)]
    wipe: bool,

    #[arg(long)]
    max_wake_count: Option<i32>,

    #[arg(long)]
    sleep_secs: Option<u32>,

    #[arg(long)]
    temperature_offset: Option<f32>,

    #[arg(long)]
    battery_offset: Option<f32>,

    /// Keep previous values when a publish is not delivered.
    #[arg(long)]
    retain_on_failure: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut NodeConfig<'_>) {
        let cycle = &mut config.cycle;
        if let Some(max) = self.max_wake_count {
            cycle.max_wake_count = max;
        }
        if let Some(secs) = self.sleep_secs {
            cycle.sleep_secs = secs;
        }
        if let Some(offset) = self.temperature_offset {
            cycle.temperature_offset = offset;
        }
        if let Some(offset) = self.battery_offset {
            cycle.battery_offset = offset;
        }
        if self.retain_on_failure {
            cycle.failed_publish = FailedPublishPolicy::RetainPrevious;
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    published: u32,
    forced: u32,
    undelivered: u32,
    quiet: u32,
    failed: u32,
    messages: usize,
    writes: usize,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let blob = match &args.config {
        Some(path) => match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Reading config {} failed: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let mut config = match blob.as_deref().map(NodeConfig::from_postcard) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            error!("Invalid config blob: {}", e);
            return ExitCode::FAILURE;
        }
        None => NodeConfig::compiled(),
    };
    args.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(path) = &args.export_config {
        return export_config(&config, path);
    }

    if args.wipe {
        match fs::remove_file(&args.state) {
            Ok(()) => info!("Wiped {}", args.state.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!("Wiping {} failed: {}", args.state.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }

    info!(
        "Simulating {} wakes, {} s apart, state in {}",
        args.cycles,
        config.cycle.sleep_secs,
        args.state.display()
    );

    let mut power = SimulatedPower::new(args.pace_ms);
    let mut tally = Tally::default();

    for wake in 1..=args.cycles {
        let elapsed = power.slept().as_secs() as f64;

        let storage = match FileStorage::open(&args.state) {
            Ok(storage) => storage,
            Err(e) => {
                error!("Opening {} failed: {}", args.state.display(), e);
                return ExitCode::FAILURE;
            }
        };

        let sensors = NodeSensors::new(
            SentinelFilter::new(SyntheticProbe::new(elapsed, wake, args.glitch_every), HostDelay),
            SyntheticSupply::new(elapsed),
        );
        let broker = LoopbackBroker::new(wake, args.drop_every);

        let mut controller =
            CycleController::new(config, DurableStore::new(storage), sensors, broker, HostDelay);

        info!("--- wake {} (t = {} s) ---", wake, elapsed);
        match block_on(run_wake_cycle(&mut controller, &mut power)) {
            Ok(report) => {
                match &report.outcome {
                    Some(outcome) if outcome.is_delivered() => {
                        tally.published += 1;
                        if report.decision.forced {
                            tally.forced += 1;
                        }
                    }
                    Some(_) => tally.undelivered += 1,
                    None => tally.quiet += 1,
                }
                info!(
                    "Persisted count {} temperature {:.2} battery {:.2}",
                    report.persisted.wake_count,
                    report.persisted.temperature,
                    report.persisted.battery
                );
            }
            Err(CycleError::Storage(e)) => {
                error!("State file unusable: {}", e);
                return ExitCode::FAILURE;
            }
            Err(_) => tally.failed += 1,
        }

        let (store, _, broker) = controller.into_parts();
        tally.messages += broker.delivered().len();
        tally.writes += store.medium().write_count();
    }

    info!(
        "Done: {} published ({} forced), {} undelivered, {} quiet, {} failed",
        tally.published, tally.forced, tally.undelivered, tally.quiet, tally.failed
    );
    info!(
        "{} messages delivered, {} field writes to the medium",
        tally.messages, tally.writes
    );
    ExitCode::SUCCESS
}

fn export_config(config: &NodeConfig<'_>, path: &Path) -> ExitCode {
    let mut buf = [0u8; CONFIG_BLOB_CAPACITY];
    let encoded = match config.to_postcard(&mut buf) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("Encoding config failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match fs::write(path, &encoded[..]) {
        Ok(()) => {
            info!("Wrote {} byte config blob to {}", encoded.len(), path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Writing {} failed: {}", path.display(), e);
            ExitCode::FAILURE
        }
    }
}
