// SPDX-License-Identifier: MIT

//! Newline-delimited JSON framing for the node's control sockets.
//!
//! Every control socket in this node (Result Server, Machinery Manager,
//! node state controller, Task Runner) speaks one JSON value per line —
//! unlike a length-prefixed framing, this keeps the wire format
//! greppable in a packet capture and lets a human type a request with
//! `socat`/`nc` for debugging.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed before a complete message was read")]
    ConnectionClosed,
    #[error("malformed JSON message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one newline-terminated JSON message from `reader`.
///
/// Returns `Ok(None)` on a clean EOF with no partial line, which callers
/// should treat as "peer disconnected", not an error.
pub async fn read_message<R, T>(reader: &mut BufReader<R>) -> Result<Option<T>, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Err(ProtocolError::ConnectionClosed);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

/// Write one message as a single JSON line.
pub async fn write_message<W, T>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
