// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-plane messages (coordinator → worker agent).

use em_core::{Fault, Task, TaskId, TaskResult};
use serde::{Deserialize, Serialize};

/// Request to a worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Execute one task. The deadline is propagated from the job engine;
    /// the worker aborts at the next safe point once it passes.
    RunTask { task: Task, deadline_ms: u64 },

    /// Liveness probe.
    Ping,

    /// Abort an in-flight task.
    Cancel { task_id: TaskId },
}

/// Response from a worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Result { result: TaskResult },
    Pong,
    Ok,
    Error { fault: Fault },
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
