//! Ring wire protocol
//!
//! This module defines the messages exchanged between neighboring ranks. The
//! protocol uses MessagePack (rmp-serde) for the message body.
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! One TCP connection per directed ring edge. Rank `r` connects to rank
//! `r+1` and accepts a connection from rank `r-1`:
//!
//! ```text
//! Rank r (connects)               Rank r+1 (accepts)
//!     |                              |
//!     |-------- HELLO -------------->|
//!     |<------- WELCOME -------------|
//!     |                              |
//!     |-------- TOKEN(tag, value) -->|
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Both ends of a link must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Channel discriminator shared by every token send and receive
///
/// At most one token is in flight per directed edge during a pass, so any
/// constant works.
pub const RING_TAG: u32 = 0;

/// Largest frame body accepted from a peer
///
/// Ring frames are a few dozen bytes; anything larger is a corrupt stream.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Link request (connecting rank → accepting rank)
    Hello(HelloMessage),

    /// Link acknowledgment (accepting rank → connecting rank)
    Welcome(WelcomeMessage),

    /// The ring token
    Token(TokenMessage),
}

/// Hello message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Rank of the connecting process
    pub rank: usize,

    /// Group size as seen by the connecting process
    pub group_size: usize,

    /// Hostname of the connecting process (diagnostics only)
    pub host: String,
}

/// Welcome message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    /// Protocol version
    pub protocol_version: u32,

    /// Rank of the accepting process
    pub rank: usize,
}

/// Token message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMessage {
    /// Channel discriminator, always [`RING_TAG`] for this protocol
    pub tag: u32,

    /// Running sum
    pub value: i64,
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg)
        .context("Failed to serialize message")?;

    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from bytes
///
/// Expects a 4-byte length prefix followed by a MessagePack-serialized message.
///
/// # Returns
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len])
        .context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read a complete message from a stream
///
/// Reads the length prefix, then the message body.
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await
        .context("Failed to read message length")?;

    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_FRAME_LEN {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_len, MAX_FRAME_LEN);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf)
        .context("Failed to deserialize message")?;

    Ok(msg)
}

/// Write a message to a stream
///
/// Returns once the framed bytes are flushed to the stream, so the caller may
/// reuse its buffer; the peer may not have read them yet.
pub async fn write_message<W: AsyncWrite + Unpin>(stream: &mut W, msg: &Message) -> Result<()> {
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await
        .context("Failed to write message")?;

    stream.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}
