// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observable state transitions.
//!
//! Serializes with `{"type": "scope:name", ...fields}` format. Demotion
//! events from the liveness sweep are how the router learns a device left
//! the eligible set mid-flight.

use crate::device::{DeviceId, Liveness};
use crate::job::{JobId, JobState};
use crate::task::{TaskId, TaskState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- device --
    #[serde(rename = "device:joined")]
    DeviceJoined { id: DeviceId, name: String, addr: String },

    #[serde(rename = "device:updated")]
    DeviceUpdated { id: DeviceId },

    #[serde(rename = "device:liveness")]
    LivenessChanged { id: DeviceId, from: Liveness, to: Liveness },

    // -- task --
    #[serde(rename = "task:state")]
    TaskStateChanged { job_id: JobId, task_id: TaskId, state: TaskState },

    // -- job --
    #[serde(rename = "job:state")]
    JobStateChanged { job_id: JobId, state: JobState },

    #[serde(rename = "job:evicted")]
    JobEvicted { job_id: JobId },
}

impl Event {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Event::DeviceJoined { .. } => "device:joined",
            Event::DeviceUpdated { .. } => "device:updated",
            Event::LivenessChanged { .. } => "device:liveness",
            Event::TaskStateChanged { .. } => "task:state",
            Event::JobStateChanged { .. } => "job:state",
            Event::JobEvicted { .. } => "job:evicted",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
