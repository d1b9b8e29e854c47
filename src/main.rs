//! OTA Agent daemon - entry point
//!
//! Loads the device config, then runs the rollout cycle periodically.
//! Cycle cadence (and retry-after-abort, which is just the next tick)
//! lives here, outside the orchestration core.

use anyhow::Context;
use clap::Parser;
use ota_agent::agent::orchestrator::{AlwaysOnline, ProcessRestarter};
use ota_agent::agent::signer::SystemClock;
use ota_agent::agent::updater::ScriptInstaller;
use ota_agent::{AgentConfig, CycleContext, HttpBackend, HttpUpdater, Orchestrator};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ota-agent")]
#[command(version)]
#[command(about = "Device-side OTA rollout agent", long_about = None)]
struct Cli {
    /// Path to the agent config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit (nonzero on abort)
    #[arg(long)]
    once: bool,

    /// Override the poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let backend = HttpBackend::new(config.endpoints.clone());
    let installer = ScriptInstaller::new(config.update.install_command.clone());
    let updater = HttpUpdater::new(
        config.endpoints.download.clone(),
        config.update.staging_dir.clone(),
        installer,
    );
    let clock = SystemClock;
    let connectivity = AlwaysOnline;
    let restarter = ProcessRestarter;

    let orchestrator = Orchestrator::new(
        &backend,
        &updater,
        &clock,
        &connectivity,
        &restarter,
        &config.device,
        &config.firmware_version,
    );

    let interval = Duration::from_secs(cli.interval.unwrap_or(config.update.poll_interval_secs));
    let mut ctx = CycleContext::new();

    info!(
        device_key = %config.device.device_key,
        firmware_version = %config.firmware_version,
        "agent started"
    );

    loop {
        let outcome = orchestrator.run_cycle(&mut ctx);

        if cli.once {
            if outcome.is_abort() {
                anyhow::bail!("cycle aborted: {}", outcome);
            }
            return Ok(());
        }

        std::thread::sleep(interval);
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("ota-agent").join("ota-agent.config.json"))
        .unwrap_or_else(|| PathBuf::from("ota-agent.config.json"))
}
