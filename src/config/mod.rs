//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation of
//! the process-group launch contract.

pub mod cli;
pub mod cli_convert;
pub mod toml;

use crate::error::RingError;
use crate::ring::{self, Neighbors};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default group size when neither the CLI nor the config file sets one
pub const DEFAULT_GROUP_SIZE: usize = 4;

/// First port tried when searching for a free block in launch mode
pub const DEFAULT_BASE_PORT: u16 = 9999;

/// Run configuration
///
/// This is what a TOML configuration file deserializes to. Every field has a
/// default, so an empty file is valid. CLI arguments take precedence (see
/// [`toml::merge_cli_with_config`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of processes in the ring (launch and simulate modes)
    pub group_size: usize,
    /// Host every rank listens on
    pub host: String,
    /// Port of rank 0 (searched for in launch mode when unset)
    pub base_port: Option<u16>,
    /// Bound on ring bootstrap, milliseconds
    pub setup_timeout_ms: u64,
    /// Exit non-zero when verification fails
    pub strict: bool,
    /// Print the outcome as a JSON line
    pub json: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            host: "127.0.0.1".to_string(),
            base_port: None,
            setup_timeout_ms: 10_000,
            strict: false,
            json: false,
        }
    }
}

impl RingConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    /// Validate settings that do not depend on a rank
    pub fn validate(&self) -> Result<()> {
        validate_group_size(self.group_size)?;

        if self.host.trim().is_empty() {
            anyhow::bail!("host must not be empty");
        }
        if self.setup_timeout_ms == 0 {
            anyhow::bail!("setup_timeout must be greater than zero");
        }
        if let Some(port) = self.base_port {
            check_port_block(port, self.group_size)?;
        }

        Ok(())
    }
}

/// Launch contract of one process in the group
///
/// Built once at the program boundary from the launcher's environment and the
/// run configuration. The ring itself only needs `rank` and `size`; the rest
/// tells the transport where its neighbors listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    /// This process's rank, in `[0, size)`
    pub rank: usize,
    /// Number of processes in the group
    pub size: usize,
    /// Host every rank listens on
    pub host: String,
    /// Port of rank 0; rank r listens on `base_port + r`
    pub base_port: u16,
    /// Bound on connecting the ring
    pub setup_timeout: Duration,
    /// Print debug lines on stderr
    pub debug: bool,
}

impl GroupConfig {
    /// Validate the launch contract
    ///
    /// Rejects a rank outside the group, an empty group, a group whose
    /// expected sum overflows `i64`, and a port block past 65535.
    pub fn validate(&self) -> Result<()> {
        ring::validate_position(self.rank, self.size)?;
        validate_group_size(self.size)?;
        check_port_block(self.base_port, self.size)?;

        if self.setup_timeout.is_zero() {
            anyhow::bail!("setup_timeout must be greater than zero");
        }

        Ok(())
    }

    pub fn neighbors(&self) -> Neighbors {
        Neighbors::of(self.rank, self.size)
    }

    /// Port rank `rank` listens on
    pub fn port_of(&self, rank: usize) -> u16 {
        self.base_port + rank as u16
    }

    /// Listen address of rank `rank`
    pub fn address_of(&self, rank: usize) -> String {
        format!("{}:{}", self.host, self.port_of(rank))
    }
}

/// Check a group size against the supported range
///
/// The supported range is `1..=ring::max_group_size()`: beyond it the
/// coordinator's expected sum no longer fits a signed 64-bit integer.
pub fn validate_group_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(RingError::InvalidGroupSize(size).into());
    }
    if ring::expected_sum(size).is_none() {
        return Err(RingError::SumOverflow(size).into());
    }
    Ok(())
}

/// Check that ports `base_port..base_port + size` all exist
fn check_port_block(base_port: u16, size: usize) -> Result<()> {
    let last = base_port as usize + size - 1;
    if last > u16::MAX as usize {
        anyhow::bail!(
            "Port block {}..={} for {} ranks exceeds 65535",
            base_port, last, size
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(rank: usize, size: usize) -> GroupConfig {
        GroupConfig {
            rank,
            size,
            host: "127.0.0.1".to_string(),
            base_port: 20000,
            setup_timeout: Duration::from_secs(5),
            debug: false,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.setup_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_group_addresses() {
        let g = group(2, 4);
        assert!(g.validate().is_ok());
        assert_eq!(g.neighbors(), Neighbors { next: 3, prev: 1 });
        assert_eq!(g.address_of(3), "127.0.0.1:20003");
        assert_eq!(g.port_of(0), 20000);
    }

    #[test]
    fn test_rank_outside_group_rejected() {
        let err = group(4, 4).validate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<RingError>(),
            Some(&RingError::InvalidRank { rank: 4, group_size: 4 })
        );
    }

    #[test]
    fn test_group_too_large_rejected() {
        let size = ring::max_group_size() + 1;
        let err = validate_group_size(size).unwrap_err();
        assert_eq!(err.downcast_ref::<RingError>(), Some(&RingError::SumOverflow(size)));

        assert!(validate_group_size(ring::max_group_size()).is_ok());
    }

    #[test]
    fn test_port_block_overflow_rejected() {
        let mut g = group(0, 10);
        g.base_port = 65530;
        assert!(g.validate().is_err());

        g.base_port = 65526;
        assert!(g.validate().is_ok());
    }
}
