// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot RPC helpers: dial, send one envelope, read one back.

use crate::control::{ControlRequest, ControlResponse};
use crate::wire::{read_envelope, write_envelope, Envelope, ProtocolError, DIAL_TIMEOUT, RPC_TIMEOUT};
use std::time::Duration;
use tokio::net::TcpStream;

/// Send one control-plane request to the coordinator at `addr`.
pub async fn call_control(
    addr: &str,
    psk: Option<&str>,
    request: &ControlRequest,
) -> Result<ControlResponse, ProtocolError> {
    call_control_with_timeout(addr, psk, request, RPC_TIMEOUT).await
}

/// Same as [`call_control`] with an explicit response timeout (job
/// submission and routed commands can legitimately take a while).
pub async fn call_control_with_timeout(
    addr: &str,
    psk: Option<&str>,
    request: &ControlRequest,
    timeout: Duration,
) -> Result<ControlResponse, ProtocolError> {
    let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    let (mut reader, mut writer) = stream.into_split();

    let envelope = Envelope::new(psk.map(str::to_string), request);
    write_envelope(&mut writer, &envelope, RPC_TIMEOUT).await?;

    let response: Envelope<ControlResponse> = read_envelope(&mut reader, timeout).await?;
    Ok(response.body)
}
