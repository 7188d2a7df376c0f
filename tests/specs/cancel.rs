//! Cancellation reaches in-flight work on the worker.

use crate::prelude::*;
use async_trait::async_trait;
use em_core::{
    Arch, Capability, DeviceId, DeviceInfo, ErrorKind, Fault, JobState, PlanRequest, Platform,
    Task, TaskState,
};
use em_proto::{ControlRequest, ControlResponse};
use em_worker::{HandlerSet, TaskHandler, WorkerContext, WorkerServer};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Echo lookalike that sleeps ten seconds unless aborted.
struct SlowEcho;

#[async_trait]
impl TaskHandler for SlowEcho {
    async fn run(&self, task: &Task, _ctx: &WorkerContext) -> Result<String, Fault> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(task.input.clone())
    }
}

async fn start_slow_worker() -> WorkerServer {
    let mut handlers = HandlerSet::empty();
    handlers.register(em_core::TaskKind::Echo, Box::new(SlowEcho));
    let ctx = WorkerContext::new(
        [Capability::Cpu].into_iter().collect(),
        None,
        None,
        std::env::temp_dir(),
    );
    let state = Arc::new(em_worker::server::ServerState::new(handlers, ctx, None));
    WorkerServer::start("127.0.0.1:0", state).await.expect("slow worker")
}

#[tokio::test]
async fn cancel_job_stops_a_sleeping_task_within_budget() {
    let coordinator = start_coordinator(None).await;

    let slow = start_slow_worker().await;
    let info = DeviceInfo {
        id: DeviceId::new("d-mac"),
        name: "d-mac".to_string(),
        platform: Platform::Darwin,
        arch: Arch::Arm64,
        addr: slow.addr().to_string(),
        capabilities: [Capability::Cpu].into_iter().collect(),
        total_ram_mb: 16_384,
        local_model: None,
    };
    match control(&coordinator, ControlRequest::Register { info }).await {
        ControlResponse::Registered { .. } => {}
        other => panic!("unexpected register response: {other:?}"),
    }

    let request = PlanRequest::text("echo this will be interrupted");
    let job_id = match control(&coordinator, ControlRequest::SubmitJob { request }).await {
        ControlResponse::Submitted { job_id } => job_id,
        other => panic!("unexpected submit response: {other:?}"),
    };

    // Let the task reach the worker before cancelling.
    wait_until("task running on the worker", Duration::from_secs(5), || {
        slow.state.running_count() == 1
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let cancelled_at = Instant::now();
    match control(&coordinator, ControlRequest::CancelJob { job_id: job_id.clone() }).await {
        ControlResponse::Ok => {}
        other => panic!("unexpected cancel response: {other:?}"),
    }

    let view = await_job(&coordinator, &job_id, Duration::from_secs(5)).await;
    assert!(cancelled_at.elapsed() < Duration::from_secs(2), "took {:?}", cancelled_at.elapsed());
    assert_eq!(view.job.state, JobState::Cancelled);
    assert_eq!(view.tasks[0].state, TaskState::Cancelled);
    assert_eq!(view.tasks[0].error.as_ref().map(|f| f.kind), Some(ErrorKind::Cancelled));

    // The worker observed the cancel and released the task slot.
    wait_until("worker slot released", Duration::from_secs(2), || {
        slow.state.running_count() == 0
    })
    .await;

    slow.shutdown().await;
    coordinator.shutdown().await;
}
