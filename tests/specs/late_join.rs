//! Late binding: a task planned without a device picks up a worker
//! that joins after submission.

use crate::prelude::*;
use em_core::{Capability, JobState, Plan, PlanRequest, PlanTask, RoutingPolicy, TaskKind};
use std::time::Duration;

#[tokio::test]
async fn late_bound_task_waits_for_an_npu_device() {
    let coordinator = start_coordinator(None).await;
    let llm = fake_llm_endpoint("late but done").await;

    // Submit before any NPU device exists. The task binds at dispatch,
    // so submission succeeds and the router retries while the group runs.
    let mut task = PlanTask::new(TaskKind::LlmGenerate, "summarize the backlog");
    task.prompt_tokens = Some(16);
    task.output_tokens = Some(16);
    task.bind_at_dispatch = true;
    let plan = Plan::single(task, "late binding");

    let mut request = PlanRequest::text("summarize the backlog");
    request.policy = RoutingPolicy::RequireNpu;
    let job_id = coordinator.engine.submit_plan(plan, &request).await.expect("submit");

    // Half a second later, the NPU box joins the mesh.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let npu = start_worker(
        &coordinator,
        "d-npu",
        [Capability::Cpu, Capability::Npu],
        Some(llm),
    )
    .await;

    let view = await_job(&coordinator, &job_id, Duration::from_secs(10)).await;
    assert_eq!(view.job.state, JobState::Done);
    assert_eq!(view.tasks[0].device.as_ref().expect("bound"), &npu.device_id);
    assert_eq!(view.tasks[0].result.as_deref(), Some("late but done"));

    npu.shutdown().await;
    coordinator.shutdown().await;
}
