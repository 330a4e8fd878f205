//! ringsum CLI entry point

use anyhow::{Context, Result};
use ringsum::config::cli::{Cli, ExecutionMode};
use ringsum::config::toml::load_config;
use ringsum::config::{GroupConfig, RingConfig, DEFAULT_BASE_PORT};
use ringsum::distributed::{Launcher, ProcessGroup};
use ringsum::ring::{self, check_outcomes, local_value, ring_pass, RingOutcome};

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    let config = load_config(&cli)
        .context("Failed to load configuration")?;
    if cli.debug {
        eprintln!("DEBUG: Effective configuration: {:?}", config);
    }

    match cli.mode {
        ExecutionMode::Launch => run_launch(&cli, config),
        ExecutionMode::Rank => run_rank(&cli, config),
        ExecutionMode::Simulate => run_simulate(config),
    }
}

/// Run in launch mode (one child process per rank on this host)
fn run_launch(cli: &Cli, config: RingConfig) -> Result<()> {
    println!("ringsum v{}", env!("CARGO_PKG_VERSION"));
    println!("Launching ring of {} processes", config.group_size);
    println!();

    let launcher = Launcher::new(config, cli.debug)
        .context("Failed to create launcher")?;

    launcher.run()
}

/// Run as one member of a process group
fn run_rank(cli: &Cli, config: RingConfig) -> Result<()> {
    let rank = cli.rank
        .ok_or_else(|| anyhow::anyhow!("Rank mode requires a rank"))?;
    let size = cli.size
        .ok_or_else(|| anyhow::anyhow!("Rank mode requires a group size"))?;

    let group_config = GroupConfig {
        rank,
        size,
        host: config.host.clone(),
        base_port: config.base_port.unwrap_or(DEFAULT_BASE_PORT),
        setup_timeout: config.setup_timeout(),
        debug: cli.debug,
    };

    // Dropped on every path out of this function, closing the links
    let mut group = ProcessGroup::init(&group_config)
        .with_context(|| format!("Rank {} failed to join the process group", rank))?;

    let outcome = ring_pass(group.rank(), group.size(), local_value(group.rank()), &mut group)
        .with_context(|| format!("Ring pass failed on rank {}", rank))?;

    finish(&[outcome], &config)
}

/// Run every rank as a thread of this process
fn run_simulate(config: RingConfig) -> Result<()> {
    config.validate()
        .context("Configuration validation failed")?;

    println!("ringsum v{}", env!("CARGO_PKG_VERSION"));
    println!("Simulating ring of {} processes in one process", config.group_size);
    println!();

    let outcomes = ring::memory::run_in_memory(config.group_size, local_value)?;

    finish(&outcomes, &config)
}

/// Print the JSON report if requested and apply the exit-status policy
///
/// Verification failure is only an error in strict mode; otherwise it has
/// already been reported on the console and the run ends normally.
fn finish(outcomes: &[RingOutcome], config: &RingConfig) -> Result<()> {
    if config.json {
        for outcome in outcomes {
            println!("{}", serde_json::to_string(outcome).context("Failed to serialize outcome")?);
        }
    }

    check_outcomes(outcomes, config.strict)
}
