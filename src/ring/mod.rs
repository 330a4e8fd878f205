//! Ring reducer
//!
//! This module holds the whole reduction protocol. Every process of the group
//! runs [`ring_pass`] with its own rank; the coordinator (rank 0) seeds a token,
//! each worker adds its contribution and forwards it, and the token returns to
//! the coordinator for verification.
//!
//! # Message Flow
//!
//! ```text
//!   [Rank 0] ──▶ [Rank 1] ──▶ [Rank 2] ──▶ ... ──▶ [Rank N-1]
//!       ▲                                              │
//!       └──────────────────────────────────────────────┘
//! ```
//!
//! # Transports
//!
//! The two blocking operations the protocol needs are injected through the
//! [`Transport`] trait. Real runs use [`crate::distributed::ProcessGroup`]
//! (TCP between processes); tests and simulate mode use
//! [`memory::MemoryGroup`] (crossbeam channels between threads).
//!
//! # Example
//!
//! ```
//! use ringsum::ring::{ring_pass, local_value, memory::MemoryGroup, RingOutcome};
//!
//! let mut group = MemoryGroup::new(1);
//! let mut transport = group.take(0).unwrap();
//! let outcome = ring_pass(0, 1, local_value(0), &mut transport).unwrap();
//! assert_eq!(outcome, RingOutcome::Solo { total: 0 });
//! ```

pub mod memory;
pub mod verification;

pub use verification::{expected_sum, max_group_size, Verification};

use crate::error::RingError;
use crate::Result;
use anyhow::Context;
use serde::Serialize;
use std::io::Write;

/// Rank of the process that seeds and closes the ring
pub const COORDINATOR: usize = 0;

/// Contribution multiplier: rank `r` holds `r * LOCAL_VALUE_STEP`
pub const LOCAL_VALUE_STEP: i64 = 1000;

/// Blocking point-to-point transport used by the ring protocol
///
/// # Blocking Semantics
///
/// - `send` returns once the transport has taken ownership of the value. It
///   may return before the peer has read it.
/// - `receive` suspends the caller until a value from `peer` is available.
///   There is no timeout; a peer that never sends stalls the caller forever.
///
/// Errors are transport failures and are fatal to the ring pass.
pub trait Transport {
    /// Send one token value to `peer`
    fn send(&mut self, peer: usize, value: i64) -> Result<()>;

    /// Block until a token value arrives from `peer`
    fn receive(&mut self, peer: usize) -> Result<i64>;
}

/// Ring neighbors of one rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Neighbors {
    /// Rank this process sends to: `(rank + 1) mod N`
    pub next: usize,
    /// Rank this process receives from: `(rank - 1 + N) mod N`
    pub prev: usize,
}

impl Neighbors {
    /// Compute the neighbors of `rank` in a ring of `group_size` processes
    ///
    /// Panics if `group_size` is 0; callers validate the group first.
    pub fn of(rank: usize, group_size: usize) -> Self {
        debug_assert!(group_size > 0, "a ring of zero processes has no neighbors");
        Self {
            next: (rank + 1) % group_size,
            prev: (rank + group_size - 1) % group_size,
        }
    }
}

/// Local contribution of a rank: `rank * 1000` in 64-bit arithmetic
pub fn local_value(rank: usize) -> i64 {
    rank as i64 * LOCAL_VALUE_STEP
}

/// Check that `rank` and `group_size` describe a valid ring position
pub fn validate_position(rank: usize, group_size: usize) -> std::result::Result<(), RingError> {
    if group_size == 0 {
        return Err(RingError::InvalidGroupSize(group_size));
    }
    if rank >= group_size {
        return Err(RingError::InvalidRank { rank, group_size });
    }
    Ok(())
}

/// What one process observed during a ring pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RingOutcome {
    /// Group of one: the local value is the total, nothing was exchanged
    Solo { total: i64 },

    /// Rank 0 after the token came back
    Coordinator {
        /// Token value sent to rank 1
        initial: i64,
        /// Token value received on ring closure
        received: i64,
        /// Rank the closing token came from (N-1)
        from: usize,
        verification: Verification,
    },

    /// Ranks 1..N-1 after forwarding the token
    Worker {
        /// Token value before this rank's contribution
        received: i64,
        /// This rank's contribution
        local: i64,
        /// Token value sent on
        forwarded: i64,
        /// Rank the token was forwarded to
        to: usize,
    },
}

impl RingOutcome {
    /// Whether this outcome counts as a verified result
    ///
    /// Only the coordinator verifies; solo runs are trivially correct and
    /// workers have nothing to check.
    pub fn passed(&self) -> bool {
        match self {
            RingOutcome::Solo { .. } | RingOutcome::Worker { .. } => true,
            RingOutcome::Coordinator { verification, .. } => verification.is_success(),
        }
    }
}

/// Apply the exit-status policy to the outcomes of a run
///
/// A verification mismatch has already been reported on the console. It is an
/// error only in strict mode.
pub fn check_outcomes(outcomes: &[RingOutcome], strict: bool) -> Result<()> {
    if !strict {
        return Ok(());
    }

    for outcome in outcomes.iter().filter(|o| !o.passed()) {
        if let RingOutcome::Coordinator { verification, .. } = outcome {
            anyhow::bail!(
                "Verification failed: expected {}, got {}",
                verification.expected,
                verification.actual
            );
        }
    }

    Ok(())
}

/// Perform one complete sum-reduction pass around the ring
///
/// Runs the coordinator role on rank 0 and the worker role on every other
/// rank. For a group of one no transport call is made.
///
/// # Arguments
///
/// * `rank` - This process's rank, in `[0, group_size)`
/// * `group_size` - Number of processes in the ring
/// * `local_value` - This rank's contribution (normally [`local_value`])
/// * `transport` - Blocking send/receive to ring neighbors
///
/// # Errors
///
/// Returns an error for an invalid rank/group combination, for a group whose
/// expected sum does not fit `i64`, and for any transport failure. A
/// verification mismatch is not an error; it is reported in the outcome.
pub fn ring_pass<T: Transport + ?Sized>(
    rank: usize,
    group_size: usize,
    local_value: i64,
    transport: &mut T,
) -> Result<RingOutcome> {
    ring_pass_with_output(rank, group_size, local_value, transport, &mut std::io::stdout())
}

/// [`ring_pass`] with the diagnostic lines written to `out` instead of stdout
pub fn ring_pass_with_output<T: Transport + ?Sized, W: Write + ?Sized>(
    rank: usize,
    group_size: usize,
    local_value: i64,
    transport: &mut T,
    out: &mut W,
) -> Result<RingOutcome> {
    validate_position(rank, group_size)?;

    if rank == COORDINATOR {
        writeln!(out, "[Process {}] Topology: Ring size = {}. Data type: i64.", rank, group_size)?;
    }

    if group_size == 1 {
        writeln!(out, "[Process {}] Only 1 process. Result is local value: {}", rank, local_value)?;
        writeln!(out, "[Process {}] Verification: SUCCESS", rank)?;
        return Ok(RingOutcome::Solo { total: local_value });
    }

    let neighbors = Neighbors::of(rank, group_size);

    if rank == COORDINATOR {
        coordinate(rank, group_size, local_value, neighbors, transport, out)
    } else {
        relay(rank, local_value, neighbors, transport, out)
    }
}

/// Coordinator role: seed the token, wait for it to come back, verify
fn coordinate<T: Transport + ?Sized, W: Write + ?Sized>(
    rank: usize,
    group_size: usize,
    local_value: i64,
    neighbors: Neighbors,
    transport: &mut T,
    out: &mut W,
) -> Result<RingOutcome> {
    let expected = expected_sum(group_size).ok_or(RingError::SumOverflow(group_size))?;

    let token = local_value;
    writeln!(out, "[Process {}] Starting token with value: {}", rank, token)?;

    transport.send(neighbors.next, token)
        .with_context(|| format!("Failed to send token to rank {}", neighbors.next))?;

    let received = transport.receive(neighbors.prev)
        .with_context(|| format!("Failed to receive token from rank {}", neighbors.prev))?;

    writeln!(out, "[Process {}] Final Result received from Process {}: {}", rank, neighbors.prev, received)?;

    let verification = Verification::check(expected, received);
    writeln!(out, "[Process {}] {}", rank, verification)?;

    Ok(RingOutcome::Coordinator {
        initial: token,
        received,
        from: neighbors.prev,
        verification,
    })
}

/// Worker role: receive, accumulate, forward
fn relay<T: Transport + ?Sized, W: Write + ?Sized>(
    rank: usize,
    local_value: i64,
    neighbors: Neighbors,
    transport: &mut T,
    out: &mut W,
) -> Result<RingOutcome> {
    // The receive must complete before this rank sends anything
    let received = transport.receive(neighbors.prev)
        .with_context(|| format!("Failed to receive token from rank {}", neighbors.prev))?;

    let forwarded = received.wrapping_add(local_value);

    writeln!(
        out,
        "[Process {}] Received token {}, added {}, sending {} to Process {}",
        rank, received, local_value, forwarded, neighbors.next
    )?;

    transport.send(neighbors.next, forwarded)
        .with_context(|| format!("Failed to send token to rank {}", neighbors.next))?;

    Ok(RingOutcome::Worker {
        received,
        local: local_value,
        forwarded,
        to: neighbors.next,
    })
}

#[cfg(test)]
mod tests {
    use super::memory::{self, MemoryGroup, OpKind};
    use super::*;

    fn run_group(group_size: usize, values: impl Fn(usize) -> i64 + Sync) -> Vec<RingOutcome> {
        memory::run_in_memory(group_size, values).unwrap()
    }

    fn coordinator_received(outcome: &RingOutcome) -> i64 {
        match outcome {
            RingOutcome::Coordinator { received, .. } => *received,
            other => panic!("Expected coordinator outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_neighbors() {
        assert_eq!(Neighbors::of(0, 4), Neighbors { next: 1, prev: 3 });
        assert_eq!(Neighbors::of(3, 4), Neighbors { next: 0, prev: 2 });
        assert_eq!(Neighbors::of(1, 2), Neighbors { next: 0, prev: 0 });
        assert_eq!(Neighbors::of(0, 1), Neighbors { next: 0, prev: 0 });
    }

    #[test]
    fn test_local_value() {
        assert_eq!(local_value(0), 0);
        assert_eq!(local_value(3), 3000);
        assert_eq!(local_value(1_000_000), 1_000_000_000);
    }

    #[test]
    fn test_validate_position() {
        assert!(validate_position(0, 1).is_ok());
        assert!(validate_position(3, 4).is_ok());
        assert_eq!(validate_position(0, 0), Err(RingError::InvalidGroupSize(0)));
        assert_eq!(
            validate_position(4, 4),
            Err(RingError::InvalidRank { rank: 4, group_size: 4 })
        );
    }

    #[test]
    fn test_single_process_is_trivial() {
        let mut group = MemoryGroup::new(1);
        let mut transport = group.take(0).unwrap();

        let outcome = ring_pass(0, 1, local_value(0), &mut transport).unwrap();

        assert_eq!(outcome, RingOutcome::Solo { total: 0 });
        assert!(outcome.passed());
        assert!(transport.operations().is_empty());
    }

    #[test]
    fn test_two_processes() {
        let outcomes = run_group(2, local_value);

        match &outcomes[0] {
            RingOutcome::Coordinator { initial, received, from, verification } => {
                assert_eq!(*initial, 0);
                assert_eq!(*received, 1000);
                assert_eq!(*from, 1);
                assert!(verification.is_success());
            }
            other => panic!("Expected coordinator outcome, got {:?}", other),
        }
        assert_eq!(
            outcomes[1],
            RingOutcome::Worker { received: 0, local: 1000, forwarded: 1000, to: 0 }
        );
    }

    #[test]
    fn test_four_processes_sum() {
        let outcomes = run_group(4, local_value);

        assert_eq!(coordinator_received(&outcomes[0]), 6000);
        assert!(outcomes.iter().all(RingOutcome::passed));
    }

    #[test]
    fn test_five_processes_rank_three_sees_prefix_sum() {
        let outcomes = run_group(5, local_value);

        assert_eq!(coordinator_received(&outcomes[0]), 10_000);
        assert_eq!(
            outcomes[3],
            RingOutcome::Worker { received: 3000, local: 3000, forwarded: 6000, to: 4 }
        );
    }

    #[test]
    fn test_sum_matches_closed_form() {
        for n in 1..=12 {
            let outcomes = run_group(n, local_value);
            let total = match &outcomes[0] {
                RingOutcome::Solo { total } => *total,
                other => coordinator_received(other),
            };
            assert_eq!(total, expected_sum(n).unwrap(), "group size {}", n);
        }
    }

    #[test]
    fn test_workers_observe_prefix_sums() {
        let n = 9;
        let outcomes = run_group(n, local_value);

        for (rank, outcome) in outcomes.iter().enumerate().skip(1) {
            let r = rank as i64;
            match outcome {
                RingOutcome::Worker { received, to, .. } => {
                    assert_eq!(*received, 1000 * r * (r - 1) / 2, "rank {}", rank);
                    assert_eq!(*to, (rank + 1) % n);
                }
                other => panic!("Expected worker outcome, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_every_rank_contributes_exactly_once() {
        // One bit per rank: a skipped or repeated rank changes the bit pattern
        let n = 10;
        let outcomes = run_group(n, |rank| 1i64 << rank);

        assert_eq!(coordinator_received(&outcomes[0]), (1i64 << n) - 1);
    }

    #[test]
    fn test_mismatch_is_reported_not_raised() {
        // Rank 2 contributes 1 too many, so the closing token is off by one
        let outcomes = run_group(3, |rank| if rank == 2 { 2001 } else { local_value(rank) });

        match &outcomes[0] {
            RingOutcome::Coordinator { verification, .. } => {
                assert!(!verification.is_success());
                assert_eq!(verification.expected, 3000);
                assert_eq!(verification.actual, 3001);
            }
            other => panic!("Expected coordinator outcome, got {:?}", other),
        }
        assert!(!outcomes[0].passed());
    }

    #[test]
    fn test_operation_order_per_role() {
        let n = 3;
        let mut group = MemoryGroup::new(n);
        let transports: Vec<_> = (0..n).map(|r| group.take(r).unwrap()).collect();
        let logs: Vec<_> = transports.iter().map(|t| t.log()).collect();

        std::thread::scope(|scope| {
            for (rank, mut transport) in transports.into_iter().enumerate() {
                scope.spawn(move || ring_pass(rank, n, local_value(rank), &mut transport).unwrap());
            }
        });

        let kinds = |rank: usize| -> Vec<(OpKind, usize)> {
            logs[rank].lock().unwrap().iter().map(|op| (op.kind, op.peer)).collect()
        };

        assert_eq!(kinds(0), vec![(OpKind::Send, 1), (OpKind::Receive, 2)]);
        assert_eq!(kinds(1), vec![(OpKind::Receive, 0), (OpKind::Send, 2)]);
        assert_eq!(kinds(2), vec![(OpKind::Receive, 1), (OpKind::Send, 0)]);
    }

    #[test]
    fn test_invalid_rank_rejected_before_io() {
        let mut group = MemoryGroup::new(2);
        let mut transport = group.take(0).unwrap();

        let err = ring_pass(2, 2, 0, &mut transport).unwrap_err();

        assert_eq!(
            err.downcast_ref::<RingError>(),
            Some(&RingError::InvalidRank { rank: 2, group_size: 2 })
        );
        assert!(transport.operations().is_empty());
    }

    #[test]
    fn test_worker_fails_when_predecessor_disconnects() {
        let mut group = MemoryGroup::new(3);
        let mut worker = group.take(1).unwrap();
        // Rank 0 exits without sending
        drop(group.take(0).unwrap());
        drop(group);

        let err = ring_pass(1, 3, local_value(1), &mut worker).unwrap_err();

        assert_eq!(err.downcast_ref::<RingError>(), Some(&RingError::PeerDisconnected(0)));
    }

    #[test]
    fn test_single_process_prints_topology_first() {
        let mut group = MemoryGroup::new(1);
        let mut transport = group.take(0).unwrap();
        let mut out = Vec::new();

        ring_pass_with_output(0, 1, local_value(0), &mut transport, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[Process 0] Topology: Ring size = 1. Data type: i64.",
                "[Process 0] Only 1 process. Result is local value: 0",
                "[Process 0] Verification: SUCCESS",
            ]
        );
    }

    #[test]
    fn test_worker_prints_no_topology() {
        let mut group = MemoryGroup::new(2);
        let mut coordinator = group.take(0).unwrap();
        let mut worker = group.take(1).unwrap();
        let mut out = Vec::new();

        coordinator.send(1, 0).unwrap();
        ring_pass_with_output(1, 2, local_value(1), &mut worker, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "[Process 1] Received token 0, added 1000, sending 1000 to Process 0\n");
    }

    #[test]
    fn test_strict_fails_on_mismatch() {
        let outcomes = run_group(3, |rank| if rank == 2 { 2001 } else { local_value(rank) });

        let err = check_outcomes(&outcomes, true).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expected 3000"), "{}", msg);
        assert!(msg.contains("got 3001"), "{}", msg);
    }

    #[test]
    fn test_lenient_ignores_mismatch() {
        let outcomes = run_group(3, |rank| if rank == 2 { 2001 } else { local_value(rank) });

        assert!(check_outcomes(&outcomes, false).is_ok());
    }

    #[test]
    fn test_strict_accepts_solo_and_workers() {
        let outcomes = vec![
            RingOutcome::Solo { total: 0 },
            RingOutcome::Worker { received: 0, local: 1000, forwarded: 1000, to: 0 },
        ];
        assert!(check_outcomes(&outcomes, true).is_ok());

        assert!(check_outcomes(&run_group(4, local_value), true).is_ok());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "no neighbors")]
    fn test_neighbors_of_empty_ring_panics() {
        Neighbors::of(0, 0);
    }

    #[test]
    fn test_outcome_json() {
        let outcome = RingOutcome::Worker { received: 0, local: 1000, forwarded: 1000, to: 0 };
        let json = serde_json::to_string(&outcome).unwrap();

        assert_eq!(
            json,
            r#"{"role":"worker","received":0,"local":1000,"forwarded":1000,"to":0}"#
        );
    }
}
