//! In-memory transport
//!
//! This module provides a [`Transport`] backed by crossbeam channels so that a
//! whole ring can run inside one process, one thread per rank. It is used by
//! simulate mode and by the protocol tests.
//!
//! # Features
//!
//! - One bounded channel (capacity 1) per ring edge
//! - Sends and receives to non-neighbors are rejected like on the wire
//! - Every completed operation is recorded for verification
//! - A dropped rank shows up as [`RingError::PeerDisconnected`] on its peers
//!
//! # Example
//!
//! ```
//! use ringsum::ring::{ring_pass, local_value, memory::MemoryGroup};
//!
//! let mut group = MemoryGroup::new(3);
//! let transports: Vec<_> = (0..3).map(|r| group.take(r).unwrap()).collect();
//!
//! std::thread::scope(|scope| {
//!     for (rank, mut transport) in transports.into_iter().enumerate() {
//!         scope.spawn(move || ring_pass(rank, 3, local_value(rank), &mut transport).unwrap());
//!     }
//! });
//! ```

use super::{ring_pass, validate_position, Neighbors, RingOutcome, Transport};
use crate::error::RingError;
use crate::Result;
use anyhow::Context;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Kind of a recorded transport operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Send,
    Receive,
}

/// Record of a completed operation for testing verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    pub kind: OpKind,
    pub peer: usize,
    pub value: i64,
}

/// Shared operation log of one rank
pub type OpLog = Arc<Mutex<Vec<OpRecord>>>;

/// Largest group [`run_in_memory`] will start, one thread per rank
pub const MAX_SIMULATED_GROUP_SIZE: usize = 4096;

/// A group of in-memory transports, one per rank
///
/// Transports are handed out once each with [`MemoryGroup::take`] and then
/// moved to the thread that plays that rank.
pub struct MemoryGroup {
    transports: Vec<Option<MemoryTransport>>,
}

impl MemoryGroup {
    /// Build a ring of `group_size` ranks
    ///
    /// Only the ring edges exist: channel `r` carries tokens from rank `r` to
    /// rank `r + 1`, so the group costs one channel per rank.
    pub fn new(group_size: usize) -> Self {
        let (senders, mut receivers): (Vec<Sender<i64>>, Vec<Receiver<i64>>) =
            (0..group_size).map(|_| bounded(1)).unzip();

        // Rank r receives on the edge leaving r - 1
        if !receivers.is_empty() {
            receivers.rotate_right(1);
        }

        let transports = senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outbound, inbound))| {
                Some(MemoryTransport {
                    rank,
                    neighbors: Neighbors::of(rank, group_size),
                    outbound,
                    inbound,
                    log: Arc::new(Mutex::new(Vec::new())),
                })
            })
            .collect();

        Self { transports }
    }

    /// Number of ranks in the group
    pub fn size(&self) -> usize {
        self.transports.len()
    }

    /// Take the transport for `rank`
    ///
    /// Returns `None` if the rank is out of range or was already taken.
    pub fn take(&mut self, rank: usize) -> Option<MemoryTransport> {
        self.transports.get_mut(rank)?.take()
    }
}

/// In-memory transport of one rank
pub struct MemoryTransport {
    rank: usize,
    neighbors: Neighbors,
    /// Edge to the next rank
    outbound: Sender<i64>,
    /// Edge from the previous rank
    inbound: Receiver<i64>,
    log: OpLog,
}

impl MemoryTransport {
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Get a copy of all completed operations
    pub fn operations(&self) -> Vec<OpRecord> {
        self.log.lock().unwrap().clone()
    }

    /// Shared handle to the operation log, still readable after the transport moved
    pub fn log(&self) -> OpLog {
        Arc::clone(&self.log)
    }

    fn unexpected_peer(&self, peer: usize) -> RingError {
        RingError::UnexpectedPeer {
            rank: self.rank,
            peer,
            next: self.neighbors.next,
            prev: self.neighbors.prev,
        }
    }

    fn record(&self, kind: OpKind, peer: usize, value: i64) {
        self.log.lock().unwrap().push(OpRecord { kind, peer, value });
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, peer: usize, value: i64) -> Result<()> {
        if peer != self.neighbors.next {
            return Err(self.unexpected_peer(peer).into());
        }

        self.outbound
            .send(value)
            .map_err(|_| RingError::PeerDisconnected(peer))?;

        self.record(OpKind::Send, peer, value);
        Ok(())
    }

    fn receive(&mut self, peer: usize) -> Result<i64> {
        if peer != self.neighbors.prev {
            return Err(self.unexpected_peer(peer).into());
        }

        let value = self.inbound
            .recv()
            .map_err(|_| RingError::PeerDisconnected(peer))?;

        self.record(OpKind::Receive, peer, value);
        Ok(value)
    }
}

/// Run a whole ring in this process, one named thread per rank
///
/// `values` gives the contribution of each rank. Returns the outcome of every
/// rank, indexed by rank. A rank that fails drops its channels, so its
/// neighbors fail with [`RingError::PeerDisconnected`] instead of hanging.
pub fn run_in_memory<F>(group_size: usize, values: F) -> Result<Vec<RingOutcome>>
where
    F: Fn(usize) -> i64 + Sync,
{
    validate_position(0, group_size)?;
    if group_size > MAX_SIMULATED_GROUP_SIZE {
        anyhow::bail!(
            "Cannot simulate {} ranks in one process (at most {} threads)",
            group_size,
            MAX_SIMULATED_GROUP_SIZE
        );
    }

    let mut group = MemoryGroup::new(group_size);
    let transports: Vec<MemoryTransport> = (0..group_size)
        .filter_map(|rank| group.take(rank))
        .collect();

    std::thread::scope(|scope| -> Result<Vec<RingOutcome>> {
        let mut handles = Vec::with_capacity(group_size);
        for mut transport in transports {
            let rank = transport.rank();
            let values = &values;
            let handle = std::thread::Builder::new()
                .name(format!("rank-{}", rank))
                .spawn_scoped(scope, move || {
                    ring_pass(rank, group_size, values(rank), &mut transport)
                })
                .with_context(|| format!("Failed to spawn thread for rank {}", rank))?;
            handles.push((rank, handle));
        }

        let mut outcomes = Vec::with_capacity(group_size);
        for (rank, handle) in handles {
            let outcome = handle
                .join()
                .map_err(|_| anyhow::anyhow!("Rank {} panicked", rank))?
                .with_context(|| format!("Rank {} failed", rank))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    })
}
