// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane listener.
//!
//! Accepts connections and handles each in a spawned task without
//! blocking the engine. Every request is one authenticated envelope;
//! every response one envelope back.

use crate::activity::ActivityTable;
use crate::engine::JobEngine;
use crate::registry::DeviceRegistry;
use em_core::{Clock, DeviceInfo, ErrorKind, Fault, IdGen};
use em_proto::{
    read_envelope, write_envelope, ControlRequest, ControlResponse, Envelope, ProtocolError,
    RPC_TIMEOUT,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared coordinator context for all request handlers.
pub struct ListenCtx<C: Clock, G: IdGen> {
    pub engine: JobEngine<C, G>,
    pub registry: Arc<DeviceRegistry<C>>,
    pub activity: Arc<ActivityTable>,
    /// Pre-shared key every request must carry (when set).
    pub psk: Option<String>,
}

/// Bind and run the accept loop until the stop token fires.
///
/// Returns the bound address (useful with port 0) and the loop handle.
pub async fn spawn<C: Clock, G: IdGen + 'static>(
    bind_addr: &str,
    ctx: Arc<ListenCtx<C, G>>,
    stop: CancellationToken,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "control plane listening");

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, &ctx).await {
                                log_connection_error(e);
                            }
                        });
                    }
                    Err(e) => error!("accept error: {e}"),
                },
            }
        }
        debug!("listener stopped");
    });

    Ok((local_addr, handle))
}

fn log_connection_error(e: ProtocolError) {
    match e {
        ProtocolError::ConnectionClosed => debug!("client disconnected"),
        ProtocolError::Timeout => warn!("connection timeout"),
        other => error!("connection error: {other}"),
    }
}

async fn handle_connection<C: Clock, G: IdGen + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &ListenCtx<C, G>,
) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();

    let envelope: Envelope<ControlRequest> = match read_envelope(&mut reader, RPC_TIMEOUT).await {
        Ok(envelope) => envelope,
        Err(ProtocolError::UnsupportedVersion { got, expected }) => {
            let response = ControlResponse::error(Fault::bad_request(format!(
                "unsupported wire version {got} (expected {expected})"
            )));
            write_envelope(&mut writer, &Envelope::new(None, response), RPC_TIMEOUT).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let response = if envelope.check_auth(ctx.psk.as_deref()).is_err() {
        warn!(%peer, "rejected request with bad psk");
        ControlResponse::error(Fault::new(ErrorKind::AuthFailed, "psk mismatch"))
    } else {
        handle_request(envelope.body, peer, ctx).await
    };

    write_envelope(&mut writer, &Envelope::new(None, response), RPC_TIMEOUT).await
}

async fn handle_request<C: Clock, G: IdGen + 'static>(
    request: ControlRequest,
    peer: SocketAddr,
    ctx: &ListenCtx<C, G>,
) -> ControlResponse {
    // Heartbeats arrive every few seconds per device; keep them at debug.
    if matches!(request, ControlRequest::Heartbeat { .. } | ControlRequest::Ping) {
        debug!(request = ?request, "received request");
    } else {
        info!(request = ?request, "received request");
    }

    match request {
        ControlRequest::Ping => ControlResponse::Pong,

        ControlRequest::Register { info } => {
            let info = resolve_addr(info, &peer);
            let observed_addr = info.addr.clone();
            let device_id = ctx.registry.register(info);
            ControlResponse::Registered { device_id, observed_addr }
        }

        ControlRequest::Heartbeat { device_id, samples } => {
            match ctx.registry.heartbeat(&device_id) {
                Ok(()) => {
                    ctx.activity.record(&device_id, samples);
                    ControlResponse::Ok
                }
                Err(e) => ControlResponse::error(e.into()),
            }
        }

        ControlRequest::ListDevices => {
            ControlResponse::Devices { devices: ctx.registry.list() }
        }

        ControlRequest::SubmitJob { request } => match ctx.engine.submit_job(&request).await {
            Ok(job_id) => ControlResponse::Submitted { job_id },
            Err(fault) => ControlResponse::error(fault),
        },

        ControlRequest::PreviewPlan { request } => match ctx.engine.preview_plan(&request).await {
            Ok(plan) => ControlResponse::Plan { plan },
            Err(fault) => ControlResponse::error(fault),
        },

        ControlRequest::GetJob { job_id } => match ctx.engine.get_job(&job_id) {
            Ok(job) => ControlResponse::Job { job },
            Err(fault) => ControlResponse::error(fault),
        },

        ControlRequest::CancelJob { job_id } => match ctx.engine.cancel_job(&job_id) {
            Ok(()) => ControlResponse::Ok,
            Err(fault) => ControlResponse::error(fault),
        },

        ControlRequest::RoutedCommand { command, args, policy, force_device_id } => {
            match ctx.engine.routed_command(&command, &args, policy, force_device_id).await {
                Ok(outcome) => ControlResponse::Routed { outcome },
                Err(fault) => ControlResponse::error(fault),
            }
        }

        ControlRequest::Activity => ControlResponse::Activity {
            running: ctx.engine.running_tasks(),
            devices: ctx.activity.snapshot(),
        },
    }
}

/// Replace an unroutable self-reported bind host (0.0.0.0 or empty) with
/// the source address the registration actually arrived from.
fn resolve_addr(mut info: DeviceInfo, peer: &SocketAddr) -> DeviceInfo {
    let (host, port) = match info.addr.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => ("", info.addr.as_str()),
    };
    if host.is_empty() || host == "0.0.0.0" || host == "[::]" {
        info.addr = format!("{}:{}", peer.ip(), port);
    }
    info
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
