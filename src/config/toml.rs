//! TOML configuration file parsing

use super::cli::Cli;
use super::cli_convert::parse_duration;
use super::RingConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<RingConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<RingConfig> {
    let config: RingConfig = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: RingConfig) -> Result<RingConfig> {
    if let Some(np) = cli.np {
        config.group_size = np;
    }
    if let Some(ref host) = cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.base_port {
        config.base_port = Some(port);
    }
    if let Some(ref timeout) = cli.setup_timeout {
        let timeout = parse_duration(timeout).context("Invalid setup timeout")?;
        config.setup_timeout_ms = timeout.as_millis() as u64;
    }

    // Flags can only switch these on
    config.strict |= cli.strict;
    config.json |= cli.json;

    Ok(config)
}

/// Load the run configuration: config file (if any) merged with the CLI
pub fn load_config(cli: &Cli) -> Result<RingConfig> {
    let base = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => RingConfig::default(),
    };

    merge_cli_with_config(cli, base)
}
