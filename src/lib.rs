//! ringsum - Ring token-passing sum reduction
//!
//! A fixed group of processes, each holding one local value, computes the
//! global sum by passing an accumulating token around a logical ring that
//! starts and ends at the coordinator (rank 0).
//!
//! # Architecture
//!
//! - **Ring reducer** (`ring`): the protocol itself, written against a blocking
//!   `Transport` so it runs unchanged over TCP or in-memory channels
//! - **Multi-process mode** (`distributed`): process-group bootstrap over TCP,
//!   wire protocol and a local launcher
//! - **Configuration** (`config`): CLI, TOML file and launch-contract validation

pub mod config;
pub mod distributed;
pub mod error;
pub mod ring;

// Re-export commonly used types
pub use config::{GroupConfig, RingConfig};
pub use error::RingError;
pub use ring::{check_outcomes, ring_pass, RingOutcome, Transport};

/// Result type used throughout ringsum
pub type Result<T> = anyhow::Result<T>;
