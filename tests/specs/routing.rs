//! Capability-aware llm routing, and hard capability requirements.

use crate::prelude::*;
use em_core::{Capability, ErrorKind, PlanRequest, RoutingPolicy, TaskKind};
use em_proto::{ControlRequest, ControlResponse};
use std::time::Duration;

#[tokio::test]
async fn llm_request_routes_to_the_npu_device() {
    let coordinator = start_coordinator(None).await;
    let llm = fake_llm_endpoint("a tidy summary").await;

    let mac = start_worker(&coordinator, "d-mac", [Capability::Cpu], Some(llm.clone())).await;
    let win = start_worker(
        &coordinator,
        "d-win",
        [Capability::Cpu, Capability::Gpu, Capability::Npu],
        Some(llm),
    )
    .await;
    wait_until("both devices registered", Duration::from_secs(5), || {
        coordinator.registry.len() == 2
    })
    .await;

    let request = PlanRequest::text("summarize the following article: the mesh held up fine");
    let job_id = match control(&coordinator, ControlRequest::SubmitJob { request }).await {
        ControlResponse::Submitted { job_id } => job_id,
        other => panic!("unexpected submit response: {other:?}"),
    };

    let view = await_job(&coordinator, &job_id, Duration::from_secs(10)).await;
    assert_done(&view);
    assert_eq!(view.tasks.len(), 1);

    let task = &view.tasks[0];
    assert_eq!(task.kind, TaskKind::LlmGenerate);
    // The npu box wins on predicted latency.
    assert_eq!(task.device.as_ref().expect("assigned"), &win.device_id);
    assert_eq!(task.result.as_deref(), Some("a tidy summary"));

    mac.shutdown().await;
    win.shutdown().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn preview_plan_estimates_tokens_for_llm() {
    let coordinator = start_coordinator(None).await;

    let request = PlanRequest::text("summarize the incident report in 300 words");
    match control(&coordinator, ControlRequest::PreviewPlan { request }).await {
        ControlResponse::Plan { plan } => {
            assert_eq!(plan.task_count(), 1);
            let task = &plan.groups[0][0];
            assert_eq!(task.kind, TaskKind::LlmGenerate);
            assert_eq!(task.prompt_tokens, Some(16));
            assert_eq!(task.output_tokens, Some(400));
            assert!(!plan.used_ai);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    coordinator.shutdown().await;
}

#[tokio::test]
async fn require_npu_with_no_npu_creates_no_job() {
    let coordinator = start_coordinator(None).await;
    let mac = start_worker(&coordinator, "d-mac", [Capability::Cpu], None).await;
    wait_until("device registered", Duration::from_secs(5), || coordinator.registry.len() == 1)
        .await;

    let mut request = PlanRequest::text("summarize");
    request.policy = RoutingPolicy::RequireNpu;

    match control(&coordinator, ControlRequest::SubmitJob { request }).await {
        ControlResponse::Error { fault } => {
            assert_eq!(fault.kind, ErrorKind::NoEligibleDevice);
        }
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(coordinator.engine.active_jobs(), 0);

    mac.shutdown().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn routed_command_reports_the_executing_device() {
    let coordinator = start_coordinator(None).await;
    let worker = start_worker(&coordinator, "runner", [Capability::Cpu], None).await;
    wait_until("device registered", Duration::from_secs(5), || coordinator.registry.len() == 1)
        .await;

    let request = ControlRequest::RoutedCommand {
        command: "uptime".to_string(),
        args: vec!["-p".to_string()],
        policy: em_core::RoutingPolicy::BestAvailable,
        force_device_id: None,
    };
    match control(&coordinator, request).await {
        ControlResponse::Routed { outcome } => {
            assert_eq!(outcome.device_name, "runner");
            assert_eq!(outcome.exit_code, 0);
            assert_eq!(outcome.stdout, "uptime -p");
        }
        other => panic!("unexpected response: {other:?}"),
    }

    worker.shutdown().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn preview_prompt_tokens_scale_with_text_length() {
    let coordinator = start_coordinator(None).await;

    let long = format!("summarize {}", "x".repeat(790));
    let request = PlanRequest::text(long);
    match control(&coordinator, ControlRequest::PreviewPlan { request }).await {
        ControlResponse::Plan { plan } => {
            // 800 chars → 200 prompt tokens.
            assert_eq!(plan.groups[0][0].prompt_tokens, Some(200));
        }
        other => panic!("unexpected response: {other:?}"),
    }

    coordinator.shutdown().await;
}
