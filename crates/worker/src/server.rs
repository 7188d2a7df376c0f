// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker RPC server: RunTask, Ping, Cancel.
//!
//! Each task runs under its own cancellation token and a per-kind
//! timeout; Cancel aborts the in-flight work at the next await point.

use crate::handler::{HandlerSet, WorkerContext};
use em_core::{ErrorKind, Fault, Task, TaskId, TaskResult};
use em_proto::{
    read_envelope, write_envelope, Envelope, ProtocolError, WorkerRequest, WorkerResponse,
    RPC_TIMEOUT,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared server state: handlers plus the in-flight task table.
pub struct ServerState {
    pub handlers: HandlerSet,
    pub ctx: WorkerContext,
    pub psk: Option<String>,
    in_flight: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl ServerState {
    pub fn new(handlers: HandlerSet, ctx: WorkerContext, psk: Option<String>) -> Self {
        Self { handlers, ctx, psk, in_flight: Mutex::new(HashMap::new()) }
    }

    /// Tasks currently executing on this worker.
    pub fn running_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn admit(&self, task_id: &TaskId) -> CancellationToken {
        let token = CancellationToken::new();
        self.in_flight.lock().insert(task_id.clone(), token.clone());
        token
    }

    fn settle(&self, task_id: &TaskId) {
        self.in_flight.lock().remove(task_id);
    }

    fn cancel(&self, task_id: &TaskId) -> bool {
        match self.in_flight.lock().get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// A running worker RPC server.
pub struct WorkerServer {
    pub state: Arc<ServerState>,
    addr: SocketAddr,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerServer {
    /// Bind and start serving. Port 0 picks an ephemeral port.
    pub async fn start(bind_addr: &str, state: Arc<ServerState>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "worker agent listening");

        let stop = CancellationToken::new();
        let loop_state = Arc::clone(&state);
        let loop_stop = stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_stop.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let state = Arc::clone(&loop_state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, &state).await {
                                    log_connection_error(e);
                                }
                            });
                        }
                        Err(e) => error!("accept error: {e}"),
                    },
                }
            }
            debug!("worker server stopped");
        });

        Ok(Self { state, addr, stop, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

fn log_connection_error(e: ProtocolError) {
    match e {
        ProtocolError::ConnectionClosed => debug!("peer disconnected"),
        ProtocolError::Timeout => warn!("connection timeout"),
        other => error!("connection error: {other}"),
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: &ServerState,
) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();
    let envelope: Envelope<WorkerRequest> = read_envelope(&mut reader, RPC_TIMEOUT).await?;

    let response = if envelope.check_auth(state.psk.as_deref()).is_err() {
        warn!(%peer, "rejected request with bad psk");
        WorkerResponse::Error { fault: Fault::new(ErrorKind::AuthFailed, "psk mismatch") }
    } else {
        handle_request(envelope.body, state).await
    };

    // Long tasks legitimately exceed the default write window's read
    // counterpart on the coordinator side; the write itself stays quick.
    write_envelope(&mut writer, &Envelope::new(None, response), RPC_TIMEOUT).await
}

async fn handle_request(request: WorkerRequest, state: &ServerState) -> WorkerResponse {
    match request {
        WorkerRequest::Ping => WorkerResponse::Pong,

        WorkerRequest::Cancel { task_id } => {
            let found = state.cancel(&task_id);
            debug!(%task_id, found, "cancel requested");
            WorkerResponse::Ok
        }

        WorkerRequest::RunTask { task, deadline_ms } => {
            let result = run_task(state, task, deadline_ms).await;
            WorkerResponse::Result { result }
        }
    }
}

async fn run_task(state: &ServerState, task: Task, deadline_ms: u64) -> TaskResult {
    debug!(task_id = %task.id, kind = %task.kind, deadline_ms, "task accepted");
    let token = state.admit(&task.id);

    // The effective budget is the tighter of the coordinator's deadline
    // and the kind's own timeout.
    let kind_budget = task.kind.default_timeout_ms();
    let budget = Duration::from_millis(kind_budget.min(deadline_ms.max(1)));

    let started = std::time::Instant::now();
    let result = tokio::select! {
        _ = token.cancelled() => TaskResult::fault(
            Fault::cancelled(),
            started.elapsed().as_millis() as u64,
        ),
        outcome = tokio::time::timeout(budget, state.handlers.execute(&task, &state.ctx)) => {
            match outcome {
                Ok(result) => result,
                Err(_) => TaskResult::fault(
                    Fault::new(ErrorKind::TaskTimeout, format!("exceeded {} ms", budget.as_millis())),
                    started.elapsed().as_millis() as u64,
                ),
            }
        }
    };

    state.settle(&task.id);
    if let Some(fault) = &result.error {
        warn!(task_id = %task.id, error = %fault, "task failed");
    } else {
        debug!(task_id = %task.id, elapsed_ms = result.elapsed_ms, "task done");
    }
    result
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
