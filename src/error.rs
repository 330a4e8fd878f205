//! Error types for the ring protocol
//!
//! Application code works with `anyhow::Result` (see [`crate::Result`]). The
//! protocol and transport layers raise `RingError` so callers can tell a
//! misconfigured group apart from a broken link with `downcast_ref`.

use thiserror::Error;

/// Domain errors raised by the ring reducer and its transports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Rank is not inside `[0, group_size)`
    #[error("Invalid rank {rank} for group of size {group_size}")]
    InvalidRank { rank: usize, group_size: usize },

    /// Group size must be at least 1
    #[error("Invalid group size: {0}")]
    InvalidGroupSize(usize),

    /// `1000 * N * (N-1) / 2` does not fit a signed 64-bit integer
    #[error("Group size {0} is too large: expected ring sum overflows i64")]
    SumOverflow(usize),

    /// A send or receive named a rank that is not a ring neighbor
    #[error("Rank {rank} cannot talk to rank {peer} (ring neighbors are next={next}, prev={prev})")]
    UnexpectedPeer {
        rank: usize,
        peer: usize,
        next: usize,
        prev: usize,
    },

    /// The link to a peer went away before the message was exchanged
    #[error("Peer {0} disconnected")]
    PeerDisconnected(usize),

    /// A token frame arrived on a different channel discriminator
    #[error("Unexpected tag {got} from peer {peer} (expected {expected})")]
    UnexpectedTag { peer: usize, expected: u32, got: u32 },

    /// A frame of the wrong kind arrived
    #[error("Unexpected message from peer {peer}: {detail}")]
    UnexpectedMessage { peer: usize, detail: String },

    /// Peers disagree on the wire protocol or group shape
    #[error("Protocol mismatch with peer {peer}: {detail}")]
    ProtocolMismatch { peer: usize, detail: String },

    /// A single-process group has no links to send or receive on
    #[error("Process group of size 1 has no peers")]
    NoPeers,
}
