//! Transient failure, retry, and reroute to a healthy device.

use crate::prelude::*;
use em_core::{
    Arch, Capability, DeviceId, DeviceInfo, JobState, Plan, PlanRequest, PlanTask, Platform,
    TaskKind,
};
use em_proto::{ControlRequest, ControlResponse};
use em_worker::{HandlerSet, WorkerContext, WorkerServer};
use std::sync::Arc;
use std::time::Duration;

/// A worker whose llm endpoint is dead: every llm task fails with
/// `llm_endpoint_unreachable`.
async fn start_broken_llm_worker() -> WorkerServer {
    let ctx = WorkerContext::new(
        [Capability::Cpu, Capability::Npu].into_iter().collect(),
        Some("http://127.0.0.1:9/v1/chat/completions".to_string()),
        None,
        std::env::temp_dir(),
    );
    let state = Arc::new(em_worker::server::ServerState::new(HandlerSet::standard(), ctx, None));
    WorkerServer::start("127.0.0.1:0", state).await.expect("broken worker")
}

#[tokio::test]
async fn transient_llm_failures_reroute_to_a_healthy_npu_device() {
    let coordinator = start_coordinator(None).await;

    // Device a: npu-capable but its llm endpoint is down. Registered
    // once, no heartbeats, so the sweep will demote it.
    let broken = start_broken_llm_worker().await;
    let info = DeviceInfo {
        id: DeviceId::new("d-a"),
        name: "a-fail".to_string(),
        platform: Platform::Linux,
        arch: Arch::Amd64,
        addr: broken.addr().to_string(),
        capabilities: [Capability::Cpu, Capability::Npu].into_iter().collect(),
        total_ram_mb: 57_344,
        local_model: None,
    };
    match control(&coordinator, ControlRequest::Register { info }).await {
        ControlResponse::Registered { .. } => {}
        other => panic!("unexpected register response: {other:?}"),
    }

    // Device b: healthy npu worker with a live endpoint and heartbeats.
    let llm = fake_llm_endpoint("rerouted fine").await;
    let good =
        start_worker(&coordinator, "b-good", [Capability::Cpu, Capability::Npu], Some(llm)).await;
    wait_until("both devices registered", Duration::from_secs(5), || {
        coordinator.registry.len() == 2
    })
    .await;

    // The name sort makes a-fail the incumbent on the latency tie, so
    // the first attempts land there.
    let mut task = PlanTask::new(TaskKind::LlmGenerate, "summarize the handoff notes");
    task.prompt_tokens = Some(16);
    task.output_tokens = Some(16);
    task.reroute_on_failure = Some(true);
    let plan = Plan::single(task, "llm with reroute enabled");
    let request = PlanRequest::text("summarize the handoff notes");

    let job_id = coordinator.engine.submit_plan(plan, &request).await.expect("submit");
    let view = await_job(&coordinator, &job_id, Duration::from_secs(15)).await;

    assert_eq!(view.job.state, JobState::Done);
    let task = &view.tasks[0];
    assert_eq!(task.result.as_deref(), Some("rerouted fine"));
    assert_eq!(task.device.as_ref().expect("assigned"), &good.device_id);
    // Two failures on a-fail, success on b-good: three dispatches total.
    assert!(task.attempts <= 3, "attempts {}", task.attempts);

    good.shutdown().await;
    broken.shutdown().await;
    coordinator.shutdown().await;
}
