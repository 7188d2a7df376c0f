// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing and the authenticated envelope.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Version tag carried by every envelope. Peers reject anything else.
pub const WIRE_VERSION: u32 = 1;

/// Maximum framed payload (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Connection dial timeout. Generous because some workers are only
/// reachable through slow tunnels.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Default per-RPC read/write timeout.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("unsupported wire version {got} (expected {expected})")]
    UnsupportedVersion { got: u32, expected: u32 },

    #[error("auth failed")]
    AuthFailed,
}

/// Versioned, authenticated wrapper around every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    /// Pre-shared key. Checked against the receiver's configured key;
    /// `None` only passes when the receiver has no key configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(auth: Option<String>, body: T) -> Self {
        Self { version: WIRE_VERSION, auth, body }
    }

    /// Validate the peer's key against ours.
    pub fn check_auth(&self, expected: Option<&str>) -> Result<(), ProtocolError> {
        match (expected, self.auth.as_deref()) {
            (None, _) => Ok(()),
            (Some(want), Some(got)) if want == got => Ok(()),
            _ => Err(ProtocolError::AuthFailed),
        }
    }
}

/// Read a length-prefixed frame.
pub async fn read_frame<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { size: len, max: MAX_FRAME_BYTES });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed frame.
pub async fn write_frame<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge { size: data.len(), max: MAX_FRAME_BYTES });
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and version-check one envelope, with a timeout.
pub async fn read_envelope<T: DeserializeOwned, R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Envelope<T>, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_frame(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;

    // Peek the version before committing to the full body shape, so an
    // incompatible peer gets UnsupportedVersion rather than a parse error.
    #[derive(Deserialize)]
    struct VersionProbe {
        version: u32,
    }
    let probe: VersionProbe = serde_json::from_slice(&bytes)?;
    if probe.version != WIRE_VERSION {
        return Err(ProtocolError::UnsupportedVersion { got: probe.version, expected: WIRE_VERSION });
    }

    Ok(serde_json::from_slice(&bytes)?)
}

/// Serialize and write one envelope, with a timeout.
pub async fn write_envelope<T: Serialize, W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope<T>,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let data = serde_json::to_vec(envelope)?;
    tokio::time::timeout(timeout, write_frame(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
