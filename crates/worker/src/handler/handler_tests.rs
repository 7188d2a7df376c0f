// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use em_core::{JobId, SysinfoReport, TaskId, TaskState};

fn task(kind: TaskKind, input: &str) -> Task {
    Task {
        id: TaskId::new("t-1"),
        job_id: JobId::new("j-1"),
        kind,
        input: input.to_string(),
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
        state: TaskState::Running,
        attempts: 1,
        started_at_ms: None,
        ended_at_ms: None,
        result: None,
        error: None,
    }
}

fn ctx() -> WorkerContext {
    WorkerContext::new(
        [Capability::Cpu, Capability::Gpu].into_iter().collect(),
        None,
        None,
        std::env::temp_dir(),
    )
}

#[tokio::test]
async fn echo_returns_input_verbatim() {
    let set = HandlerSet::standard();
    let result = set.execute(&task(TaskKind::Echo, "hello mesh"), &ctx()).await;
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.result, "hello mesh");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn unknown_kind_is_unsupported() {
    let set = HandlerSet::standard();
    let result = set.execute(&task(TaskKind::StreamStart, ""), &ctx()).await;
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::UnsupportedTaskKind);
}

#[tokio::test]
async fn sysinfo_reports_structured_fields() {
    let set = HandlerSet::standard();
    let result = set.execute(&task(TaskKind::Sysinfo, ""), &ctx()).await;
    assert_eq!(result.exit_code, 0);

    let report: SysinfoReport = serde_json::from_str(&result.result).unwrap();
    assert!(!report.hostname.is_empty());
    assert_eq!(report.os, std::env::consts::OS);
    assert!(report.total_ram_mb > 0);
    assert!(report.used_ram_mb <= report.total_ram_mb);
    // Flags mirror declared capabilities, not probed hardware.
    assert!(report.has_gpu);
    assert!(!report.has_npu);
}

#[tokio::test]
async fn llm_without_endpoint_is_unreachable() {
    let set = HandlerSet::standard();
    let result = set.execute(&task(TaskKind::LlmGenerate, "prompt"), &ctx()).await;
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::LlmEndpointUnreachable);
}

#[tokio::test]
async fn llm_with_dead_endpoint_is_unreachable() {
    let set = HandlerSet::standard();
    let mut ctx = ctx();
    ctx.llm_endpoint = Some("http://127.0.0.1:9/v1/chat/completions".to_string());
    let result = set.execute(&task(TaskKind::LlmGenerate, "prompt"), &ctx).await;
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::LlmEndpointUnreachable);
}

#[test]
fn completion_parsing() {
    let body = r#"{"choices":[{"message":{"role":"assistant","content":"a tidy summary"}}]}"#;
    assert_eq!(super::llm::parse_completion(body).unwrap(), "a tidy summary");

    let empty = r#"{"choices":[]}"#;
    assert!(super::llm::parse_completion(empty).is_err());

    assert!(super::llm::parse_completion("not json").is_err());
}

#[tokio::test]
async fn handler_set_supports_standard_kinds() {
    let set = HandlerSet::standard();
    for kind in TaskKind::PLANNABLE {
        assert!(set.supports(kind), "missing handler for {kind}");
    }
    assert!(!set.supports(TaskKind::StreamStart));
}
