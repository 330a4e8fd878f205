//! Multi-process mode
//!
//! This module runs the ring across real processes.
//!
//! # Architecture
//!
//! - **Launcher**: Spawns one rank process per ring member on this host
//! - **Process group**: Per-process TCP links to the two ring neighbors
//! - **Protocol**: Length-prefixed MessagePack frames on those links
//!
//! # Modules
//!
//! - `protocol`: Message definitions and serialization
//! - `group`: Process-group bootstrap, blocking transport and teardown
//! - `launcher`: Local launcher for a whole group

pub mod group;
pub mod launcher;
pub mod protocol;

// Re-export key types
pub use protocol::{
    Message,
    HelloMessage,
    WelcomeMessage,
    TokenMessage,
    PROTOCOL_VERSION,
    RING_TAG,
};

pub use group::ProcessGroup;
pub use launcher::Launcher;
