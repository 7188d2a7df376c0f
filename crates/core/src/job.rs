// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job state machine.
//!
//! A job owns an ordered list of task groups by id; the tasks themselves
//! live in the engine's flat table keyed by `TaskId`.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a job instance.
    pub struct JobId;
}

/// Job lifecycle: `Submitted → Running → (Done|Failed|Cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        })
    }
}

/// An executing instance of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// The request text the plan was synthesized from.
    pub request: String,
    /// Task ids per group; group order is execution order.
    pub groups: Vec<Vec<TaskId>>,
    pub state: JobState,
    /// Newline-joined task results in group-then-index order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl Job {
    pub fn new(id: JobId, request: impl Into<String>, groups: Vec<Vec<TaskId>>, epoch_ms: u64) -> Self {
        Self {
            id,
            request: request.into(),
            groups,
            state: JobState::Submitted,
            final_result: None,
            created_at_ms: epoch_ms,
            finished_at_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn task_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// All task ids in group-then-index order.
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.groups.iter().flatten()
    }

    pub fn finish(&mut self, state: JobState, final_result: Option<String>, epoch_ms: u64) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.final_result = final_result;
        self.finished_at_ms = Some(epoch_ms);
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
