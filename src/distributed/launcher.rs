//! Local process-group launcher
//!
//! Starts one copy of the current executable per rank, in rank mode, with the
//! launch contract passed through environment variables:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `RINGSUM_RANK` | rank of the child, `0..N` |
//! | `RINGSUM_SIZE` | group size `N` |
//! | `RINGSUM_HOST` | host every rank listens on |
//! | `RINGSUM_BASE_PORT` | port of rank 0; rank r listens on base + r |
//!
//! Children inherit stdout and stderr, so every rank writes to the same
//! console.

use crate::config::{RingConfig, DEFAULT_BASE_PORT};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};

pub const ENV_RANK: &str = "RINGSUM_RANK";
pub const ENV_SIZE: &str = "RINGSUM_SIZE";
pub const ENV_HOST: &str = "RINGSUM_HOST";
pub const ENV_BASE_PORT: &str = "RINGSUM_BASE_PORT";

/// Find `count` consecutive ports on `host` that can currently be bound
///
/// Searches upwards from `first`. The ports are released again before
/// returning, so another process may still grab one before the ranks bind.
pub fn find_port_block(host: &str, count: usize, first: u16) -> Result<u16> {
    use std::net::TcpListener;

    if count == 0 {
        anyhow::bail!("Port block must hold at least one port");
    }

    let last_start = (u16::MAX as usize + 1).saturating_sub(count);
    let mut base = first as usize;

    'search: while base <= last_start {
        let mut held = Vec::with_capacity(count);
        for offset in 0..count {
            let port = (base + offset) as u16;
            match TcpListener::bind((host, port)) {
                Ok(listener) => held.push(listener),
                Err(_) => {
                    // Restart after the port that is taken
                    base += offset + 1;
                    continue 'search;
                }
            }
        }
        return Ok(base as u16);
    }

    anyhow::bail!(
        "No block of {} free ports found on {} starting at {}",
        count, host, first
    )
}

/// Spawns and supervises the ranks of a local process group
pub struct Launcher {
    config: RingConfig,
    exe_path: PathBuf,
    debug: bool,
}

impl Launcher {
    /// Create a launcher that starts copies of the current executable
    pub fn new(config: RingConfig, debug: bool) -> Result<Self> {
        config.validate().context("Invalid launch configuration")?;

        let exe_path = std::env::current_exe()
            .context("Failed to get current executable path")?;

        Ok(Self { config, exe_path, debug })
    }

    /// Use a different executable for the ranks
    pub fn with_executable(mut self, exe_path: PathBuf) -> Self {
        self.exe_path = exe_path;
        self
    }

    /// Build the command that starts `rank`
    pub fn command_for(&self, rank: usize, base_port: u16) -> Command {
        let mut cmd = Command::new(&self.exe_path);
        cmd.arg("--mode").arg("rank");
        cmd.arg("--setup-timeout").arg(format!("{}ms", self.config.setup_timeout_ms));

        if self.config.strict {
            cmd.arg("--strict");
        }
        if self.config.json {
            cmd.arg("--json");
        }
        if self.debug {
            cmd.arg("--debug");
        }

        cmd.env(ENV_RANK, rank.to_string());
        cmd.env(ENV_SIZE, self.config.group_size.to_string());
        cmd.env(ENV_HOST, &self.config.host);
        cmd.env(ENV_BASE_PORT, base_port.to_string());

        cmd
    }

    /// Launch every rank and wait for all of them
    ///
    /// Fails if any rank cannot be started or exits unsuccessfully. Waits
    /// without a timeout: a rank that never finishes keeps the launcher
    /// waiting too.
    pub fn run(&self) -> Result<()> {
        let size = self.config.group_size;

        let base_port = match self.config.base_port {
            Some(port) => port,
            None => find_port_block(&self.config.host, size, DEFAULT_BASE_PORT)?,
        };

        if self.debug {
            eprintln!(
                "DEBUG: Launching {} ranks on {} ports {}..={}",
                size,
                self.config.host,
                base_port,
                base_port as usize + size - 1
            );
        }

        let mut children: Vec<(usize, Child)> = Vec::with_capacity(size);
        for rank in 0..size {
            match self.command_for(rank, base_port).spawn() {
                Ok(child) => {
                    if self.debug {
                        eprintln!("DEBUG: Rank {} started (PID: {})", rank, child.id());
                    }
                    children.push((rank, child));
                }
                Err(e) => {
                    // The ranks already started would wait for this one forever
                    kill_all(&mut children, self.debug);
                    return Err(e).with_context(|| format!("Failed to spawn rank {}", rank));
                }
            }
        }

        let mut failed: Vec<(usize, ExitStatus)> = Vec::new();
        for (rank, mut child) in children {
            let status = child.wait()
                .with_context(|| format!("Failed to wait for rank {}", rank))?;
            if self.debug {
                eprintln!("DEBUG: Rank {} exited with status: {}", rank, status);
            }
            if !status.success() {
                failed.push((rank, status));
            }
        }

        if !failed.is_empty() {
            let summary: Vec<String> = failed
                .iter()
                .map(|(rank, status)| format!("rank {} ({})", rank, status))
                .collect();
            anyhow::bail!("{} of {} ranks failed: {}", failed.len(), size, summary.join(", "));
        }

        Ok(())
    }
}

/// Force-kill already started ranks
fn kill_all(children: &mut Vec<(usize, Child)>, debug: bool) {
    for (rank, child) in children.iter_mut() {
        if let Err(e) = child.kill() {
            eprintln!("Warning: Failed to kill rank {}: {}", rank, e);
            continue;
        }
        match child.wait() {
            Ok(status) if debug => eprintln!("DEBUG: Rank {} killed with status: {}", rank, status),
            Ok(_) => {}
            Err(e) => eprintln!("Warning: Failed to reap rank {}: {}", rank, e),
        }
    }
    children.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn launcher(config: RingConfig) -> Launcher {
        Launcher::new(config, false).unwrap()
    }

    fn env_of<'a>(cmd: &'a Command, key: &str) -> Option<&'a OsStr> {
        cmd.get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .and_then(|(_, v)| v)
    }

    #[test]
    fn test_find_port_block_is_bindable() {
        let base = find_port_block("127.0.0.1", 3, 23000).unwrap();
        assert!(base >= 23000);

        for offset in 0..3u16 {
            std::net::TcpListener::bind(("127.0.0.1", base + offset)).unwrap();
        }
    }

    #[test]
    fn test_find_port_block_skips_taken_port() {
        let taken = find_port_block("127.0.0.1", 1, 23200).unwrap();
        let _guard = std::net::TcpListener::bind(("127.0.0.1", taken)).unwrap();

        let base = find_port_block("127.0.0.1", 2, taken).unwrap();
        assert!(base > taken);
    }

    #[test]
    fn test_find_port_block_rejects_empty_block() {
        assert!(find_port_block("127.0.0.1", 0, 23400).is_err());
    }

    #[test]
    fn test_command_carries_launch_contract() {
        let config = RingConfig {
            group_size: 3,
            host: "127.0.0.1".to_string(),
            setup_timeout_ms: 1500,
            strict: true,
            ..RingConfig::default()
        };
        let cmd = launcher(config).command_for(2, 24000);

        assert_eq!(env_of(&cmd, ENV_RANK), Some(OsStr::new("2")));
        assert_eq!(env_of(&cmd, ENV_SIZE), Some(OsStr::new("3")));
        assert_eq!(env_of(&cmd, ENV_HOST), Some(OsStr::new("127.0.0.1")));
        assert_eq!(env_of(&cmd, ENV_BASE_PORT), Some(OsStr::new("24000")));

        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(
            args,
            ["--mode", "rank", "--setup-timeout", "1500ms", "--strict"]
                .iter()
                .map(OsStr::new)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RingConfig { group_size: 0, ..RingConfig::default() };
        assert!(Launcher::new(config, false).is_err());
    }

    #[test]
    fn test_failing_ranks_reported() {
        let config = RingConfig { group_size: 2, base_port: Some(24100), ..RingConfig::default() };
        let launcher = launcher(config).with_executable(PathBuf::from("false"));

        let err = launcher.run().unwrap_err();
        assert!(err.to_string().contains("2 of 2 ranks failed"), "{}", err);
    }

    #[test]
    fn test_spawn_failure_reported() {
        let config = RingConfig { group_size: 2, base_port: Some(24200), ..RingConfig::default() };
        let launcher = launcher(config).with_executable(PathBuf::from("/nonexistent/ringsum"));

        let err = launcher.run().unwrap_err();
        assert!(err.to_string().contains("Failed to spawn rank 0"), "{}", err);
    }
}
