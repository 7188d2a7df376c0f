//! Shared harness: coordinators, workers, and fake model endpoints on
//! loopback TCP.

#![allow(dead_code)]

use em_coordinator::{Coordinator, CoordinatorConfig, SmartPlanner};
use em_core::{Capability, DeviceId, JobState, SystemClock, UuidIdGen};
use em_proto::{call_control, ControlRequest, ControlResponse, JobView};
use em_worker::{WorkerAgent, WorkerConfig};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A coordinator tuned for test wall-clocks: fast sweeps, short stale
/// windows, spec-default retry policy.
pub async fn start_coordinator(local_device_id: Option<DeviceId>) -> Coordinator<SystemClock, UuidIdGen> {
    let config = CoordinatorConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        local_device_id,
        sweep_interval: Duration::from_millis(50),
        stale_after: Duration::from_millis(600),
        lost_after: Duration::from_secs(60),
        ..CoordinatorConfig::default()
    };
    Coordinator::start_with(config, SystemClock, UuidIdGen, Arc::new(SmartPlanner::new()))
        .await
        .expect("coordinator failed to start")
}

/// Start a worker agent joined to the coordinator, with a fast heartbeat.
pub async fn start_worker(
    coordinator: &Coordinator<SystemClock, UuidIdGen>,
    name: &str,
    capabilities: impl IntoIterator<Item = Capability>,
    llm_endpoint: Option<String>,
) -> WorkerAgent {
    let shared_dir = tempfile::tempdir().expect("tempdir");
    let config = WorkerConfig {
        name: name.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        coordinator_addr: Some(coordinator.addr().to_string()),
        psk: None,
        capabilities: capabilities.into_iter().collect::<BTreeSet<_>>(),
        local_model: None,
        shared_dir: shared_dir.keep(),
        llm_endpoint,
        image_endpoint: None,
        heartbeat_interval: Duration::from_millis(200),
    };
    WorkerAgent::start(config).await.expect("worker failed to start")
}

/// One control-plane call against the coordinator.
pub async fn control(
    coordinator: &Coordinator<SystemClock, UuidIdGen>,
    request: ControlRequest,
) -> ControlResponse {
    call_control(&coordinator.addr().to_string(), None, &request)
        .await
        .expect("control call failed")
}

/// Poll GetJob until the job is terminal or the deadline passes.
pub async fn await_job(
    coordinator: &Coordinator<SystemClock, UuidIdGen>,
    job_id: &em_core::JobId,
    deadline: Duration,
) -> JobView {
    let started = std::time::Instant::now();
    loop {
        match control(coordinator, ControlRequest::GetJob { job_id: job_id.clone() }).await {
            ControlResponse::Job { job } if job.job.state.is_terminal() => return job,
            ControlResponse::Job { .. } => {}
            other => panic!("unexpected GetJob response: {other:?}"),
        }
        assert!(
            started.elapsed() < deadline,
            "job {job_id} still not terminal after {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub fn assert_done(view: &JobView) {
    assert_eq!(view.job.state, JobState::Done, "job not done: {view:?}");
}

/// Minimal OpenAI-compatible chat endpoint: answers every POST with a
/// fixed completion.
pub async fn fake_llm_endpoint(completion: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let body = serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": completion}}]
    })
    .to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let body = body.clone();
            tokio::spawn(async move {
                // Drain the request enough to unblock the client writer.
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{addr}/v1/chat/completions")
}

/// Wait until a registry predicate holds (e.g. a device registered).
pub async fn wait_until<F: Fn() -> bool>(what: &str, deadline: Duration, predicate: F) {
    let started = std::time::Instant::now();
    while !predicate() {
        assert!(started.elapsed() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
