// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task kinds, state machine, and results.

use crate::device::{Capability, DeviceId};
use crate::error::Fault;
use crate::job::JobId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

crate::define_id! {
    /// Unique identifier for a task within a job.
    pub struct TaskId;
}

/// Upper bound on opaque task input (checked at submission).
pub const MAX_INPUT_BYTES: usize = 256 * 1024;

/// Unit-of-work type. Workers dispatch on this via a handler table;
/// kinds without a registered handler fail with `unsupported_task_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Sysinfo,
    Echo,
    LlmGenerate,
    ImageGenerate,
    StreamStart,
}

impl TaskKind {
    /// Kinds the planner is allowed to emit.
    pub const PLANNABLE: [TaskKind; 4] =
        [TaskKind::Sysinfo, TaskKind::Echo, TaskKind::LlmGenerate, TaskKind::ImageGenerate];

    /// Compute tasks carry model inference; everything else is meta.
    pub fn is_compute(self) -> bool {
        matches!(self, TaskKind::LlmGenerate | TaskKind::ImageGenerate)
    }

    /// Per-task execution timeout enforced by the worker.
    pub fn default_timeout_ms(self) -> u64 {
        if self.is_compute() {
            120_000
        } else {
            30_000
        }
    }

    /// Whether a transient failure moves the task to another eligible
    /// device by default. Compute tasks stay put: their artifacts and
    /// model state live on the assigned device.
    pub fn reroutes_by_default(self) -> bool {
        !self.is_compute()
    }

    pub fn parse(s: &str) -> Option<TaskKind> {
        match s {
            "sysinfo" => Some(TaskKind::Sysinfo),
            "echo" => Some(TaskKind::Echo),
            "llm_generate" => Some(TaskKind::LlmGenerate),
            "image_generate" => Some(TaskKind::ImageGenerate),
            "stream_start" => Some(TaskKind::StreamStart),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskKind::Sysinfo => "sysinfo",
            TaskKind::Echo => "echo",
            TaskKind::LlmGenerate => "llm_generate",
            TaskKind::ImageGenerate => "image_generate",
            TaskKind::StreamStart => "stream_start",
        })
    }
}

/// Task lifecycle: `Pending → Queued → Running → (Done|Failed|Cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        })
    }
}

/// What a worker returns for one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub result: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Fault>,
    pub elapsed_ms: u64,
}

impl TaskResult {
    pub fn ok(result: impl Into<String>, elapsed_ms: u64) -> Self {
        Self { result: result.into(), exit_code: 0, error: None, elapsed_ms }
    }

    pub fn fault(fault: Fault, elapsed_ms: u64) -> Self {
        Self { result: String::new(), exit_code: 1, error: Some(fault), elapsed_ms }
    }
}

/// A task instance in the job engine's flat table.
///
/// The owning job references tasks by id only; the task points back with
/// `job_id` (no owning pointers both ways).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub input: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_caps: BTreeSet<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    /// Overrides the kind's baseline RAM estimate (MB).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_mb: Option<u64>,
    /// Assigned device; `None` until routed (late binding).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    #[serde(default)]
    pub bind_at_dispatch: bool,
    /// A failed critical task fails the whole job.
    pub critical: bool,
    pub reroute_on_failure: bool,
    /// Position in the plan: groups run sequentially, tasks in a group
    /// fan out in parallel.
    pub group: usize,
    pub index: usize,
    pub state: TaskState,
    /// Dispatch attempts so far (bounded by retry limit + 1).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Fault>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn mark_queued(&mut self) {
        self.state = TaskState::Queued;
    }

    pub fn mark_running(&mut self, epoch_ms: u64) {
        self.state = TaskState::Running;
        if self.started_at_ms.is_none() {
            self.started_at_ms = Some(epoch_ms);
        }
    }

    pub fn mark_done(&mut self, result: String, epoch_ms: u64) {
        self.state = TaskState::Done;
        self.result = Some(result);
        self.ended_at_ms = Some(epoch_ms);
    }

    pub fn mark_failed(&mut self, fault: Fault, epoch_ms: u64) {
        self.state = TaskState::Failed;
        self.error = Some(fault);
        self.ended_at_ms = Some(epoch_ms);
    }

    pub fn mark_cancelled(&mut self, epoch_ms: u64) {
        self.state = TaskState::Cancelled;
        self.error = Some(Fault::cancelled());
        self.ended_at_ms = Some(epoch_ms);
    }
}

/// Structured SYSINFO payload so fleet summaries stay parseable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysinfoReport {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub total_ram_mb: u64,
    pub used_ram_mb: u64,
    pub cpu_load_pct: f32,
    pub has_gpu: bool,
    pub has_npu: bool,
}

impl SysinfoReport {
    /// One-line rendering used in reduced job output.
    pub fn summary(&self) -> String {
        format!(
            "{} {}/{} ram={}MB used={}MB cpu={:.0}% gpu={} npu={}",
            self.hostname,
            self.os,
            self.arch,
            self.total_ram_mb,
            self.used_ram_mb,
            self.cpu_load_pct,
            self.has_gpu,
            self.has_npu,
        )
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
