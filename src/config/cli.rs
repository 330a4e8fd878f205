//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Launch mode (default) - spawn one rank process per ring member on localhost
    Launch,
    /// Rank mode - run as a single member of a process group
    Rank,
    /// Simulate mode - run every rank as a thread in this process
    Simulate,
}

/// ringsum - Ring token-passing sum reduction
#[derive(Parser, Debug, Clone)]
#[command(name = "ringsum")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: launch, rank, or simulate
    #[arg(long, value_enum, default_value = "launch")]
    pub mode: ExecutionMode,

    /// Number of processes in the ring (launch and simulate modes)
    #[arg(short = 'n', long)]
    pub np: Option<usize>,

    /// Rank of this process (rank mode, normally set by the launcher)
    #[arg(long, env = "RINGSUM_RANK")]
    pub rank: Option<usize>,

    /// Group size (rank mode, normally set by the launcher)
    #[arg(long, env = "RINGSUM_SIZE")]
    pub size: Option<usize>,

    /// Host every rank listens on
    #[arg(long, env = "RINGSUM_HOST")]
    pub host: Option<String>,

    /// Port of rank 0; rank r listens on base_port + r
    ///
    /// In launch mode a free block of ports is searched for when omitted.
    #[arg(long, env = "RINGSUM_BASE_PORT")]
    pub base_port: Option<u16>,

    /// Time allowed to connect the ring before giving up (e.g., 500ms, 10s, 1m)
    #[arg(long)]
    pub setup_timeout: Option<String>,

    /// Exit with a non-zero status when verification fails
    #[arg(long)]
    pub strict: bool,

    /// Print the outcome of this process as a JSON line
    #[arg(long)]
    pub json: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug output on stderr
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.np == Some(0) {
            anyhow::bail!("np must be at least 1");
        }

        if self.mode == ExecutionMode::Rank {
            if self.rank.is_none() {
                anyhow::bail!("Rank mode requires --rank (or RINGSUM_RANK)");
            }
            if self.size.is_none() {
                anyhow::bail!("Rank mode requires --size (or RINGSUM_SIZE)");
            }
        }

        Ok(())
    }
}
