//! Process group over TCP
//!
//! This module implements the transport a real ring participant uses. A
//! `ProcessGroup`:
//! - Listens on `host:base_port + rank`
//! - Connects to the next rank and accepts the previous rank, concurrently
//! - Handshakes both links (protocol version, group size, peer rank)
//! - Exposes blocking `send`/`receive` for the ring pass
//! - Shuts the outbound link down when dropped
//!
//! A group of one opens no sockets at all.

use crate::config::GroupConfig;
use crate::distributed::protocol::*;
use crate::error::RingError;
use crate::ring::{Neighbors, Transport};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::time::sleep;

/// Delay between connection attempts while the next rank is still starting
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Membership in a ring process group
///
/// Created once per process with [`ProcessGroup::init`] and dropped at exit.
/// Mirrors an MPI-style environment handle: rank and size are fixed for the
/// lifetime of the value.
pub struct ProcessGroup {
    rank: usize,
    size: usize,
    neighbors: Neighbors,
    debug: bool,
    /// `None` for a group of one
    links: Option<Links>,
}

/// Open links to both ring neighbors
struct Links {
    /// Connection to the next rank (this process sends on it)
    outbound: TcpStream,
    /// Connection from the previous rank (this process receives on it)
    inbound: TcpStream,
    /// Drives the blocking API; dropped after the streams
    runtime: Runtime,
}

impl Drop for Links {
    fn drop(&mut self) {
        // Flushes a FIN to the next rank; it has already read everything it needs
        let _ = self.runtime.block_on(self.outbound.shutdown());
    }
}

impl ProcessGroup {
    /// Join the process group described by `config`
    ///
    /// Blocks until both ring links are established and handshaken, or fails
    /// once `config.setup_timeout` elapses. Any failure here is an environment
    /// failure: the ring pass must not start.
    pub fn init(config: &GroupConfig) -> Result<Self> {
        config.validate().context("Invalid process group configuration")?;

        let neighbors = config.neighbors();

        if config.size == 1 {
            if config.debug {
                eprintln!("DEBUG: Group of one, no links to establish");
            }
            return Ok(Self {
                rank: config.rank,
                size: config.size,
                neighbors,
                debug: config.debug,
                links: None,
            });
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?;

        let (outbound, inbound) = runtime.block_on(async {
            tokio::time::timeout(config.setup_timeout, connect_ring(config, neighbors))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "Timed out after {:.1}s waiting for ring neighbors (next={}, prev={})",
                        config.setup_timeout.as_secs_f64(),
                        neighbors.next,
                        neighbors.prev
                    )
                })?
        })?;

        if config.debug {
            eprintln!(
                "DEBUG: Rank {} linked: sending to {} ({}), receiving from {} ({})",
                config.rank,
                neighbors.next,
                config.address_of(neighbors.next),
                neighbors.prev,
                inbound.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string()),
            );
        }

        Ok(Self {
            rank: config.rank,
            size: config.size,
            neighbors,
            debug: config.debug,
            links: Some(Links { outbound, inbound, runtime }),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn neighbors(&self) -> Neighbors {
        self.neighbors
    }

    fn unexpected_peer(&self, peer: usize) -> RingError {
        RingError::UnexpectedPeer {
            rank: self.rank,
            peer,
            next: self.neighbors.next,
            prev: self.neighbors.prev,
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.debug {
            eprintln!("DEBUG: Rank {} leaving process group", self.rank);
        }
    }
}

impl Transport for ProcessGroup {
    fn send(&mut self, peer: usize, value: i64) -> Result<()> {
        if peer != self.neighbors.next {
            return Err(self.unexpected_peer(peer).into());
        }
        let links = self.links.as_mut().ok_or(RingError::NoPeers)?;

        let msg = Message::Token(TokenMessage { tag: RING_TAG, value });
        links.runtime.block_on(write_message(&mut links.outbound, &msg))
            .map_err(|e| disconnected_or(e, peer))?;

        Ok(())
    }

    fn receive(&mut self, peer: usize) -> Result<i64> {
        if peer != self.neighbors.prev {
            return Err(self.unexpected_peer(peer).into());
        }
        let links = self.links.as_mut().ok_or(RingError::NoPeers)?;

        // No timeout: a peer that never sends blocks this call forever
        let msg = links.runtime.block_on(read_message(&mut links.inbound))
            .map_err(|e| disconnected_or(e, peer))?;

        match msg {
            Message::Token(token) if token.tag == RING_TAG => Ok(token.value),
            Message::Token(token) => Err(RingError::UnexpectedTag {
                peer,
                expected: RING_TAG,
                got: token.tag,
            }
            .into()),
            other => Err(RingError::UnexpectedMessage {
                peer,
                detail: format!("expected TOKEN, got {:?}", other),
            }
            .into()),
        }
    }
}

/// Map a closed connection to `PeerDisconnected`, keep other errors as they are
fn disconnected_or(err: anyhow::Error, peer: usize) -> anyhow::Error {
    use std::io::ErrorKind;

    let closed = err.chain().any(|cause| {
        cause.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            )
        })
    });

    if closed {
        anyhow::Error::new(RingError::PeerDisconnected(peer)).context(format!("{:#}", err))
    } else {
        err
    }
}

/// Establish both ring links
///
/// Connecting and accepting run concurrently: every rank waits on its
/// predecessor's connection while its own connection to its successor is in
/// progress, so doing them one after the other would deadlock the ring.
async fn connect_ring(config: &GroupConfig, neighbors: Neighbors) -> Result<(TcpStream, TcpStream)> {
    let listen_addr = config.address_of(config.rank);
    let listener = TcpListener::bind(&listen_addr).await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;

    if config.debug {
        eprintln!("DEBUG: Rank {} listening on {}", config.rank, listen_addr);
    }

    tokio::try_join!(
        connect_next(config, neighbors.next),
        accept_prev(&listener, config, neighbors.prev),
    )
}

/// Connect to the next rank and handshake
async fn connect_next(config: &GroupConfig, next: usize) -> Result<TcpStream> {
    let addr = config.address_of(next);

    let mut stream = loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => break stream,
            Err(e) => {
                if config.debug {
                    eprintln!("DEBUG: Connect to rank {} ({}) failed: {}, retrying", next, addr, e);
                }
                sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    };
    stream.set_nodelay(true)
        .context("Failed to set TCP_NODELAY")?;

    let hello = HelloMessage {
        protocol_version: PROTOCOL_VERSION,
        rank: config.rank,
        group_size: config.size,
        host: get_host_id(),
    };
    write_message(&mut stream, &Message::Hello(hello)).await
        .with_context(|| format!("Failed to send HELLO to rank {}", next))?;

    match read_message(&mut stream).await
        .with_context(|| format!("Failed to read WELCOME from rank {}", next))?
    {
        Message::Welcome(welcome) => {
            if welcome.protocol_version != PROTOCOL_VERSION {
                return Err(RingError::ProtocolMismatch {
                    peer: next,
                    detail: format!(
                        "protocol version: ours={}, theirs={}",
                        PROTOCOL_VERSION, welcome.protocol_version
                    ),
                }
                .into());
            }
            if welcome.rank != next {
                return Err(RingError::ProtocolMismatch {
                    peer: next,
                    detail: format!("{} answered as rank {}", addr, welcome.rank),
                }
                .into());
            }
        }
        other => {
            return Err(RingError::UnexpectedMessage {
                peer: next,
                detail: format!("expected WELCOME, got {:?}", other),
            }
            .into());
        }
    }

    Ok(stream)
}

/// Accept the previous rank's connection and handshake
async fn accept_prev(listener: &TcpListener, config: &GroupConfig, prev: usize) -> Result<TcpStream> {
    let (mut stream, addr) = listener.accept().await
        .context("Failed to accept connection")?;
    stream.set_nodelay(true)
        .context("Failed to set TCP_NODELAY")?;

    let hello = match read_message(&mut stream).await
        .with_context(|| format!("Failed to read HELLO from {}", addr))?
    {
        Message::Hello(hello) => hello,
        other => {
            return Err(RingError::UnexpectedMessage {
                peer: prev,
                detail: format!("expected HELLO from {}, got {:?}", addr, other),
            }
            .into());
        }
    };

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(RingError::ProtocolMismatch {
            peer: prev,
            detail: format!(
                "protocol version: ours={}, theirs={}",
                PROTOCOL_VERSION, hello.protocol_version
            ),
        }
        .into());
    }
    if hello.group_size != config.size {
        return Err(RingError::ProtocolMismatch {
            peer: prev,
            detail: format!("group size: ours={}, theirs={}", config.size, hello.group_size),
        }
        .into());
    }
    if hello.rank != prev {
        return Err(RingError::UnexpectedPeer {
            rank: config.rank,
            peer: hello.rank,
            next: config.neighbors().next,
            prev,
        }
        .into());
    }

    if config.debug {
        eprintln!("DEBUG: Rank {} accepted rank {} from {} ({})", config.rank, prev, addr, hello.host);
    }

    let welcome = WelcomeMessage {
        protocol_version: PROTOCOL_VERSION,
        rank: config.rank,
    };
    write_message(&mut stream, &Message::Welcome(welcome)).await
        .with_context(|| format!("Failed to send WELCOME to rank {}", prev))?;

    Ok(stream)
}

/// Get an identifier for this host (hostname, or "unknown")
fn get_host_id() -> String {
    if let Ok(hostname) = hostname::get() {
        if let Ok(hostname_str) = hostname.into_string() {
            return hostname_str;
        }
    }

    "unknown".to_string()
}
