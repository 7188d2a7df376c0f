// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job engine behavior: fan-out, retries, rerouting, late binding,
//! cancellation, reduction, and admission control.

use super::*;
use crate::planner::SmartPlanner;
use crate::transport::{FakeOutcome, FakeTransport};
use em_core::{Capability, Device, FakeClock, SequentialIdGen, TaskKind};
use std::time::Instant;

struct Harness {
    engine: JobEngine<FakeClock, SequentialIdGen>,
    registry: Arc<DeviceRegistry<FakeClock>>,
    transport: Arc<crate::transport::FakeTransport>,
    clock: FakeClock,
}

fn harness_with(config: CoordinatorConfig) -> Harness {
    let clock = FakeClock::default();
    let registry = Arc::new(DeviceRegistry::new(clock.clone()));
    let transport = Arc::new(FakeTransport::new());
    let engine = JobEngine::new(
        config,
        clock.clone(),
        SequentialIdGen::new("id"),
        Arc::clone(&registry),
        CostEstimator::new(),
        Arc::new(SmartPlanner::new()),
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(ActivityTable::new()),
    );
    Harness { engine, registry, transport, clock }
}

fn harness() -> Harness {
    let config = CoordinatorConfig {
        retry_backoff: vec![Duration::from_millis(10), Duration::from_millis(20)],
        group_await_slack: Duration::from_secs(2),
        ..CoordinatorConfig::default()
    };
    harness_with(config)
}

fn cpu_device(id: &str, addr: &str) -> em_core::DeviceInfo {
    Device::builder().id(id).name(id).addr(addr).total_ram_mb(16_384).info()
}

fn npu_device(id: &str, addr: &str) -> em_core::DeviceInfo {
    Device::builder()
        .id(id)
        .name(id)
        .addr(addr)
        .capabilities([Capability::Cpu, Capability::Npu])
        .total_ram_mb(57_344)
        .info()
}

fn llm_plan(reroute: Option<bool>, bind_at_dispatch: bool) -> Plan {
    let mut task = PlanTask::new(TaskKind::LlmGenerate, "summarize the notes");
    task.prompt_tokens = Some(16);
    task.output_tokens = Some(16);
    task.reroute_on_failure = reroute;
    task.bind_at_dispatch = bind_at_dispatch;
    Plan::single(task, "test plan")
}

#[tokio::test]
async fn fleet_status_fans_out_and_reduces() {
    let h = harness();
    h.registry.register(cpu_device("d-mac", "w-mac"));
    h.registry.register(cpu_device("d-win", "w-win"));
    h.transport.script("w-mac", FakeOutcome::ok("mesh-mac ok"));
    h.transport.script("w-win", FakeOutcome::ok("mesh-win ok"));

    let request = PlanRequest::text("collect status from all devices");
    let job_id = h.engine.submit_job(&request).await.unwrap();
    let view = h.engine.wait_terminal(&job_id).await.unwrap();

    assert_eq!(view.job.state, JobState::Done);
    assert_eq!(view.tasks.len(), 2);
    let final_result = view.job.final_result.unwrap();
    assert!(final_result.contains("mesh-mac ok"), "got: {final_result}");
    assert!(final_result.contains("mesh-win ok"));
}

#[tokio::test]
async fn require_npu_without_npu_creates_no_job() {
    let h = harness();
    h.registry.register(cpu_device("d-mac", "w-mac"));

    let mut request = PlanRequest::text("summarize this");
    request.policy = RoutingPolicy::RequireNpu;

    let fault = h.engine.submit_job(&request).await.unwrap_err();
    assert_eq!(fault.kind, ErrorKind::NoEligibleDevice);
    assert_eq!(h.engine.active_jobs(), 0);
}

#[tokio::test]
async fn transient_failures_respect_the_attempt_bound() {
    let h = harness();
    h.registry.register(npu_device("d-a", "w-a"));
    for _ in 0..5 {
        h.transport
            .script("w-a", FakeOutcome::fail(ErrorKind::LlmEndpointUnreachable, "llm down"));
    }

    let request = PlanRequest::text("summarize the notes");
    let job_id =
        h.engine.submit_plan(llm_plan(Some(false), false), &request).await.unwrap();
    let view = h.engine.wait_terminal(&job_id).await.unwrap();

    assert_eq!(view.job.state, JobState::Failed);
    let task = &view.tasks[0];
    assert_eq!(task.state, TaskState::Failed);
    // R = 2 retries means at most 3 dispatches.
    assert_eq!(task.attempts, 3);
    assert_eq!(h.transport.calls_to("w-a"), 3);
}

#[tokio::test]
async fn permanent_failures_do_not_retry() {
    let h = harness();
    h.registry.register(cpu_device("d-a", "w-a"));
    h.transport.script("w-a", FakeOutcome::fail(ErrorKind::UnsupportedTaskKind, "no handler"));

    let request = PlanRequest::text("echo hello");
    let job_id = h.engine.submit_job(&request).await.unwrap();
    let view = h.engine.wait_terminal(&job_id).await.unwrap();

    assert_eq!(view.job.state, JobState::Failed);
    assert_eq!(h.transport.calls_to("w-a"), 1);
    assert_eq!(view.tasks[0].error.as_ref().unwrap().kind, ErrorKind::UnsupportedTaskKind);
}

#[tokio::test]
async fn transient_failure_reroutes_when_device_goes_stale() {
    let h = harness();
    h.registry.register(npu_device("d-a", "w-a"));
    h.registry.register(npu_device("d-b", "w-b"));
    h.transport.script("w-a", FakeOutcome::fail(ErrorKind::LlmEndpointUnreachable, "down"));
    h.transport.script(
        "w-a",
        FakeOutcome::Fail {
            fault: Fault::new(ErrorKind::LlmEndpointUnreachable, "down"),
            delay: Duration::from_millis(50),
        },
    );
    h.transport.script("w-b", FakeOutcome::ok("done by b"));

    let request = PlanRequest::text("summarize the notes");
    let job_id = h.engine.submit_plan(llm_plan(Some(true), false), &request).await.unwrap();

    // While attempt 2 is in flight, d-a stops heartbeating and the sweep
    // demotes it; attempt 3 must land on d-b.
    tokio::time::sleep(Duration::from_millis(40)).await;
    h.clock.advance(Duration::from_secs(16));
    h.registry.sweep(Duration::from_secs(15), Duration::from_secs(60));

    let view = h.engine.wait_terminal(&job_id).await.unwrap();
    assert_eq!(view.job.state, JobState::Done);
    let task = &view.tasks[0];
    assert_eq!(task.state, TaskState::Done);
    assert_eq!(task.result.as_deref(), Some("done by b"));
    assert_eq!(task.device.as_ref().unwrap(), "d-b");
    assert!(task.attempts <= 3, "attempts {}", task.attempts);
    assert_eq!(h.transport.calls_to("w-a"), 2);
    assert_eq!(h.transport.calls_to("w-b"), 1);
}

#[tokio::test]
async fn late_binding_picks_up_a_device_that_joins_after_submit() {
    let h = harness();

    let mut request = PlanRequest::text("summarize the notes");
    request.policy = RoutingPolicy::RequireNpu;

    // No NPU device exists yet; submission succeeds because the task
    // binds at dispatch.
    let job_id = h.engine.submit_plan(llm_plan(None, true), &request).await.unwrap();

    tokio::time::sleep(Duration::from_millis(15)).await;
    h.registry.register(npu_device("d-npu", "w-npu"));
    h.transport.script("w-npu", FakeOutcome::ok("bound late"));

    let view = h.engine.wait_terminal(&job_id).await.unwrap();
    assert_eq!(view.job.state, JobState::Done);
    assert_eq!(view.tasks[0].device.as_ref().unwrap(), "d-npu");
}

#[tokio::test]
async fn cancel_job_reaches_in_flight_tasks() {
    let h = harness();
    h.registry.register(cpu_device("d-mac", "w-mac"));
    h.transport.script("w-mac", FakeOutcome::Hang);

    let request = PlanRequest::text("echo sleep");
    let job_id = h.engine.submit_job(&request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = Instant::now();
    h.engine.cancel_job(&job_id).unwrap();
    let view = h.engine.wait_terminal(&job_id).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(view.job.state, JobState::Cancelled);
    assert_eq!(view.tasks[0].state, TaskState::Cancelled);
    // The worker saw the cancel.
    assert_eq!(h.transport.cancelled().len(), 1);
}

#[tokio::test]
async fn group_order_is_strict_even_with_slow_first_group() {
    let h = harness();
    h.registry.register(cpu_device("d-a", "w-a"));
    h.transport.script("w-a", FakeOutcome::ok_after("g0-a", Duration::from_millis(60)));
    h.transport.script("w-a", FakeOutcome::ok_after("g0-b", Duration::from_millis(10)));
    h.transport.script("w-a", FakeOutcome::ok("g1"));

    let plan = Plan {
        groups: vec![
            vec![PlanTask::new(TaskKind::Echo, "a"), PlanTask::new(TaskKind::Echo, "b")],
            vec![PlanTask::new(TaskKind::Echo, "c")],
        ],
        rationale: "two groups".to_string(),
        notes: vec![],
        used_ai: false,
    };
    let request = PlanRequest::text("echo pipeline");
    let job_id = h.engine.submit_plan(plan, &request).await.unwrap();
    let view = h.engine.wait_terminal(&job_id).await.unwrap();

    assert_eq!(view.job.state, JobState::Done);
    // Dispatch order on the wire: both group-0 tasks before the group-1 task.
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 3);
    let group_of = |task_id: &em_core::TaskId| {
        view.tasks.iter().find(|t| &t.id == task_id).unwrap().group
    };
    assert_eq!(group_of(&calls[0].task_id), 0);
    assert_eq!(group_of(&calls[1].task_id), 0);
    assert_eq!(group_of(&calls[2].task_id), 1);
}

#[tokio::test]
async fn fan_out_is_parallel_not_serialized() {
    let h = harness();
    for i in 0..3 {
        let id = format!("d-{i}");
        let addr = format!("w-{i}");
        h.registry.register(cpu_device(&id, &addr));
        h.transport.script(&addr, FakeOutcome::ok_after("ok", Duration::from_millis(100)));
    }

    let request = PlanRequest::text("collect status from all devices");
    let started = Instant::now();
    let job_id = h.engine.submit_job(&request).await.unwrap();
    let view = h.engine.wait_terminal(&job_id).await.unwrap();

    assert_eq!(view.job.state, JobState::Done);
    assert_eq!(view.tasks.len(), 3);
    // Serial execution would take ≥300ms; parallel stays near 100ms.
    assert!(started.elapsed() < Duration::from_millis(200), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn reduction_is_deterministic_group_then_index() {
    for _ in 0..2 {
        let h = harness();
        h.registry.register(cpu_device("d-a", "w-a"));

        let plan = Plan {
            groups: vec![
                vec![PlanTask::new(TaskKind::Echo, "alpha"), PlanTask::new(TaskKind::Echo, "beta")],
                vec![PlanTask::new(TaskKind::Echo, "gamma")],
            ],
            rationale: "reduce".to_string(),
            notes: vec![],
            used_ai: false,
        };
        let request = PlanRequest::text("echo");
        let job_id = h.engine.submit_plan(plan, &request).await.unwrap();
        let view = h.engine.wait_terminal(&job_id).await.unwrap();

        // The fake echoes inputs; reduction is group-then-index joined
        // with newlines, byte for byte.
        assert_eq!(view.job.final_result.as_deref(), Some("alpha\nbeta\ngamma"));
    }
}

#[tokio::test]
async fn non_critical_failures_leave_job_done() {
    let h = harness();
    h.registry.register(cpu_device("d-a", "w-a"));
    h.registry.register(cpu_device("d-b", "w-b"));
    h.transport.script("w-b", FakeOutcome::fail(ErrorKind::UnsupportedTaskKind, "no handler"));

    // Fleet plans mark sysinfo tasks non-critical.
    let request = PlanRequest::text("collect status from all devices");
    let job_id = h.engine.submit_job(&request).await.unwrap();
    let view = h.engine.wait_terminal(&job_id).await.unwrap();

    assert_eq!(view.job.state, JobState::Done);
    let failed = view.tasks.iter().filter(|t| t.state == TaskState::Failed).count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn submit_watermark_returns_too_many_jobs() {
    let config = CoordinatorConfig {
        max_active_jobs: 1,
        retry_backoff: vec![Duration::from_millis(10)],
        ..CoordinatorConfig::default()
    };
    let h = harness_with(config);
    h.registry.register(cpu_device("d-a", "w-a"));
    h.transport.script("w-a", FakeOutcome::Hang);

    let first = h.engine.submit_job(&PlanRequest::text("echo one")).await.unwrap();
    let fault = h.engine.submit_job(&PlanRequest::text("echo two")).await.unwrap_err();
    assert_eq!(fault.kind, ErrorKind::TooManyJobs);

    h.engine.cancel_job(&first).unwrap();
    h.engine.wait_terminal(&first).await.unwrap();
    // Terminal jobs free the watermark.
    h.engine.submit_job(&PlanRequest::text("echo three")).await.unwrap();
}

#[tokio::test]
async fn routed_command_executes_on_best_device() {
    let h = harness();
    h.registry.register(cpu_device("d-mac", "w-mac"));

    let outcome = h
        .engine
        .routed_command("uptime", &["-p".to_string()], RoutingPolicy::BestAvailable, None)
        .await
        .unwrap();

    assert_eq!(outcome.device_id, "d-mac");
    assert_eq!(outcome.device_name, "d-mac");
    assert_eq!(outcome.exit_code, 0);
    // The echo handler returns the command line verbatim.
    assert_eq!(outcome.stdout, "uptime -p");
    assert!(outcome.stderr.is_empty());
}

#[tokio::test]
async fn routed_command_with_no_devices_fails() {
    let h = harness();
    let fault = h
        .engine
        .routed_command("uptime", &[], RoutingPolicy::BestAvailable, None)
        .await
        .unwrap_err();
    assert_eq!(fault.kind, ErrorKind::NoEligibleDevice);
}

#[tokio::test]
async fn unknown_job_lookups_are_not_found() {
    let h = harness();
    let ghost = JobId::new("ghost");
    assert_eq!(h.engine.get_job(&ghost).unwrap_err().kind, ErrorKind::NotFound);
    assert_eq!(h.engine.cancel_job(&ghost).unwrap_err().kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn terminal_jobs_are_evicted_after_retention() {
    let h = harness();
    h.registry.register(cpu_device("d-a", "w-a"));

    let job_id = h.engine.submit_job(&PlanRequest::text("echo hi")).await.unwrap();
    h.engine.wait_terminal(&job_id).await.unwrap();

    // Still within retention.
    assert_eq!(h.engine.evict_expired(), 0);
    assert!(h.engine.get_job(&job_id).is_ok());

    h.clock.advance(Duration::from_secs(31 * 60));
    assert_eq!(h.engine.evict_expired(), 1);
    assert_eq!(h.engine.get_job(&job_id).unwrap_err().kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn running_tasks_snapshot_reflects_in_flight_work() {
    let h = harness();
    h.registry.register(cpu_device("d-a", "w-a"));
    h.transport.script("w-a", FakeOutcome::Hang);

    let job_id = h.engine.submit_job(&PlanRequest::text("echo hold")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let running = h.engine.running_tasks();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].job_id, job_id);
    assert_eq!(running[0].device_id.as_ref().unwrap(), "d-a");

    h.engine.cancel_job(&job_id).unwrap();
    h.engine.wait_terminal(&job_id).await.unwrap();
    assert!(h.engine.running_tasks().is_empty());
}

#[tokio::test]
async fn preview_does_not_create_a_job() {
    let h = harness();
    h.registry.register(cpu_device("d-a", "w-a"));

    let plan = h.engine.preview_plan(&PlanRequest::text("echo hi")).await.unwrap();
    assert_eq!(plan.task_count(), 1);
    assert_eq!(h.engine.active_jobs(), 0);
    assert!(h.transport.calls().is_empty());
}
