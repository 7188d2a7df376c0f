// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use em_core::{ErrorKind, JobId, TaskKind, TaskState};

fn minimal_task() -> Task {
    Task {
        id: TaskId::new("t-1"),
        job_id: JobId::new("j-1"),
        kind: TaskKind::Echo,
        input: "ping".to_string(),
        required_caps: Default::default(),
        prompt_tokens: None,
        output_tokens: None,
        ram_mb: None,
        device: None,
        bind_at_dispatch: false,
        critical: true,
        reroute_on_failure: true,
        group: 0,
        index: 0,
        state: TaskState::Queued,
        attempts: 1,
        started_at_ms: None,
        ended_at_ms: None,
        result: None,
        error: None,
    }
}

#[test]
fn run_task_round_trips() {
    let request = WorkerRequest::RunTask { task: minimal_task(), deadline_ms: 30_000 };
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["type"], "run_task");
    assert_eq!(json["task"]["kind"], "echo");
    assert_eq!(json["deadline_ms"], 30_000);

    let back: WorkerRequest = serde_json::from_value(json).unwrap();
    assert_eq!(back, request);
}

#[test]
fn result_response_with_fault() {
    let response = WorkerResponse::Result {
        result: TaskResult::fault(
            Fault::new(ErrorKind::LlmEndpointUnreachable, "connection refused"),
            120,
        ),
    };
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["result"]["error"]["kind"], "llm_endpoint_unreachable");
    assert_eq!(json["result"]["exit_code"], 1);
}

#[test]
fn cancel_carries_task_id() {
    let request = WorkerRequest::Cancel { task_id: TaskId::new("t-9") };
    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"t-9\""));
    let back: WorkerRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, request);
}
