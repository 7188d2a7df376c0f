// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator-side transport to workers.
//!
//! The engine talks to an abstract `Transport` so a worker behind a slow
//! tunnel (alternate host:port) is interchangeable with a direct one, and
//! tests swap in a scripted fake.

use async_trait::async_trait;
use em_core::{ErrorKind, Fault, Task, TaskId, TaskResult};
use em_proto::{
    read_envelope, write_envelope, Envelope, ProtocolError, WorkerRequest, WorkerResponse,
    DIAL_TIMEOUT, RPC_TIMEOUT,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

/// RPC surface the job engine needs from a worker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one task on the worker at `addr`. The deadline covers the
    /// whole call; the worker gets it too and aborts at its next safe point.
    async fn run_task(&self, addr: &str, task: &Task, deadline: Duration)
        -> Result<TaskResult, Fault>;

    async fn ping(&self, addr: &str) -> Result<(), Fault>;

    async fn cancel(&self, addr: &str, task_id: &TaskId) -> Result<(), Fault>;
}

fn unreachable_fault(addr: &str, e: impl std::fmt::Display) -> Fault {
    Fault::new(ErrorKind::DeviceNotLive, format!("worker {addr} unreachable: {e}"))
}

fn protocol_fault(e: ProtocolError) -> Fault {
    match e {
        ProtocolError::AuthFailed => Fault::new(ErrorKind::AuthFailed, "psk rejected"),
        ProtocolError::Timeout => Fault::new(ErrorKind::TaskTimeout, "rpc deadline exceeded"),
        ProtocolError::UnsupportedVersion { got, expected } => Fault::new(
            ErrorKind::BadRequest,
            format!("peer speaks wire version {got}, expected {expected}"),
        ),
        other => Fault::new(ErrorKind::Internal, other.to_string()),
    }
}

/// Length-prefixed JSON over TCP, one connection per call, with a bounded
/// concurrency window per worker.
pub struct TcpTransport {
    psk: Option<String>,
    window: usize,
    windows: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl TcpTransport {
    pub fn new(psk: Option<String>, window: usize) -> Self {
        Self { psk, window: window.max(1), windows: Mutex::new(HashMap::new()) }
    }

    fn window_for(&self, addr: &str) -> Arc<Semaphore> {
        let mut windows = self.windows.lock();
        Arc::clone(
            windows.entry(addr.to_string()).or_insert_with(|| Arc::new(Semaphore::new(self.window))),
        )
    }

    async fn call(
        &self,
        addr: &str,
        request: &WorkerRequest,
        timeout: Duration,
    ) -> Result<WorkerResponse, Fault> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| unreachable_fault(addr, "dial timeout"))?
            .map_err(|e| unreachable_fault(addr, e))?;
        let (mut reader, mut writer) = stream.into_split();

        let envelope = Envelope::new(self.psk.clone(), request);
        write_envelope(&mut writer, &envelope, RPC_TIMEOUT).await.map_err(protocol_fault)?;

        let response: Envelope<WorkerResponse> =
            read_envelope(&mut reader, timeout).await.map_err(protocol_fault)?;
        Ok(response.body)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn run_task(
        &self,
        addr: &str,
        task: &Task,
        deadline: Duration,
    ) -> Result<TaskResult, Fault> {
        let window = self.window_for(addr);
        let queued_at = Instant::now();
        let _permit = window
            .acquire_owned()
            .await
            .map_err(|_| Fault::internal("worker window closed"))?;
        let queued_for_device_ms = queued_at.elapsed().as_millis() as u64;
        if queued_for_device_ms > 0 {
            tracing::debug!(addr, queued_for_device_ms, task_id = %task.id, "dispatch queued");
        }

        let request = WorkerRequest::RunTask {
            task: task.clone(),
            deadline_ms: deadline.as_millis() as u64,
        };
        // Allow a little slack past the task deadline for framing overhead.
        let timeout = deadline + Duration::from_secs(2);
        match self.call(addr, &request, timeout).await? {
            WorkerResponse::Result { result } => Ok(result),
            WorkerResponse::Error { fault } => Err(fault),
            other => Err(Fault::internal(format!("unexpected worker response: {other:?}"))),
        }
    }

    async fn ping(&self, addr: &str) -> Result<(), Fault> {
        match self.call(addr, &WorkerRequest::Ping, RPC_TIMEOUT).await? {
            WorkerResponse::Pong => Ok(()),
            other => Err(Fault::internal(format!("unexpected ping response: {other:?}"))),
        }
    }

    async fn cancel(&self, addr: &str, task_id: &TaskId) -> Result<(), Fault> {
        let request = WorkerRequest::Cancel { task_id: task_id.clone() };
        match self.call(addr, &request, RPC_TIMEOUT).await? {
            WorkerResponse::Ok => Ok(()),
            WorkerResponse::Error { fault } => Err(fault),
            other => Err(Fault::internal(format!("unexpected cancel response: {other:?}"))),
        }
    }
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeCall, FakeOutcome, FakeTransport};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use std::collections::VecDeque;

    /// One recorded `run_task` invocation.
    #[derive(Debug, Clone)]
    pub struct FakeCall {
        pub addr: String,
        pub task_id: TaskId,
        pub kind: em_core::TaskKind,
        pub attempt: u32,
        pub deadline: Duration,
    }

    /// Scripted behavior for one `run_task` call.
    #[derive(Debug, Clone)]
    pub enum FakeOutcome {
        Succeed { result: String, delay: Duration },
        Fail { fault: Fault, delay: Duration },
        /// Never completes; pair with a deadline or a cancel.
        Hang,
    }

    impl FakeOutcome {
        pub fn ok(result: impl Into<String>) -> Self {
            FakeOutcome::Succeed { result: result.into(), delay: Duration::ZERO }
        }

        pub fn ok_after(result: impl Into<String>, delay: Duration) -> Self {
            FakeOutcome::Succeed { result: result.into(), delay }
        }

        pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
            FakeOutcome::Fail { fault: Fault::new(kind, message), delay: Duration::ZERO }
        }
    }

    /// Scripted transport for engine tests. Outcomes are queued per
    /// worker address and consumed in order; an unscripted call echoes
    /// the task input.
    #[derive(Default)]
    pub struct FakeTransport {
        scripts: Mutex<HashMap<String, VecDeque<FakeOutcome>>>,
        calls: Mutex<Vec<FakeCall>>,
        cancelled: Mutex<Vec<TaskId>>,
        unreachable: Mutex<std::collections::HashSet<String>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, addr: &str, outcome: FakeOutcome) {
            self.scripts.lock().entry(addr.to_string()).or_default().push_back(outcome);
        }

        /// Make every call to `addr` fail like a dead host.
        pub fn set_unreachable(&self, addr: &str) {
            self.unreachable.lock().insert(addr.to_string());
        }

        pub fn calls(&self) -> Vec<FakeCall> {
            self.calls.lock().clone()
        }

        pub fn calls_to(&self, addr: &str) -> usize {
            self.calls.lock().iter().filter(|c| c.addr == addr).count()
        }

        pub fn cancelled(&self) -> Vec<TaskId> {
            self.cancelled.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn run_task(
            &self,
            addr: &str,
            task: &Task,
            deadline: Duration,
        ) -> Result<TaskResult, Fault> {
            self.calls.lock().push(FakeCall {
                addr: addr.to_string(),
                task_id: task.id.clone(),
                kind: task.kind,
                attempt: task.attempts,
                deadline,
            });

            if self.unreachable.lock().contains(addr) {
                return Err(unreachable_fault(addr, "connection refused"));
            }

            let outcome = self.scripts.lock().get_mut(addr).and_then(VecDeque::pop_front);
            match outcome {
                None => Ok(TaskResult::ok(task.input.clone(), 1)),
                Some(FakeOutcome::Succeed { result, delay }) => {
                    tokio::time::sleep(delay).await;
                    Ok(TaskResult::ok(result, delay.as_millis() as u64))
                }
                Some(FakeOutcome::Fail { fault, delay }) => {
                    tokio::time::sleep(delay).await;
                    Err(fault)
                }
                Some(FakeOutcome::Hang) => {
                    std::future::pending::<()>().await;
                    Err(Fault::internal("unreachable"))
                }
            }
        }

        async fn ping(&self, addr: &str) -> Result<(), Fault> {
            if self.unreachable.lock().contains(addr) {
                return Err(unreachable_fault(addr, "connection refused"));
            }
            Ok(())
        }

        async fn cancel(&self, _addr: &str, task_id: &TaskId) -> Result<(), Fault> {
            self.cancelled.lock().push(task_id.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
