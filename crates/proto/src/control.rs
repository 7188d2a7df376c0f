// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane messages (callers and workers → coordinator).

use em_core::{
    ActivitySample, Device, DeviceId, DeviceInfo, Fault, Job, JobId, Plan, PlanRequest,
    RoutingPolicy, Task, TaskId, TaskKind,
};
use serde::{Deserialize, Serialize};

/// Request to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Health check ping.
    Ping,

    /// Device joining (or re-joining) the mesh.
    Register { info: DeviceInfo },

    /// Liveness refresh with piggybacked activity samples.
    Heartbeat {
        device_id: DeviceId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        samples: Vec<ActivitySample>,
    },

    /// Snapshot of the registry.
    ListDevices,

    /// Plan and execute a request.
    SubmitJob { request: PlanRequest },

    /// Plan without creating a job.
    PreviewPlan { request: PlanRequest },

    /// Fetch a job with its tasks.
    GetJob { job_id: JobId },

    /// Cancel a running job.
    CancelJob { job_id: JobId },

    /// One-shot routed command: a single task planned, routed by policy,
    /// and executed synchronously.
    RoutedCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default)]
        policy: RoutingPolicy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        force_device_id: Option<DeviceId>,
    },

    /// Running tasks and per-device activity rings.
    Activity,
}

/// Response from the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Pong,

    Ok,

    Registered {
        device_id: DeviceId,
        /// The source address the registration arrived from, echoed back
        /// so workers behind NAT learn their reachable address.
        observed_addr: String,
    },

    Devices { devices: Vec<Device> },

    Submitted { job_id: JobId },

    Plan { plan: Plan },

    Job { job: JobView },

    Routed { outcome: RoutedOutcome },

    Activity {
        running: Vec<RunningTask>,
        devices: Vec<DeviceActivity>,
    },

    Error { fault: Fault },
}

impl ControlResponse {
    pub fn error(fault: Fault) -> Self {
        ControlResponse::Error { fault }
    }
}

/// A job with its task rows resolved from the flat table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job: Job,
    pub tasks: Vec<Task>,
}

/// Result of a routed one-shot command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedOutcome {
    pub device_id: DeviceId,
    pub device_name: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

/// Snapshot row for a task currently in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
}

/// Ring snapshot for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceActivity {
    pub device_id: DeviceId,
    pub samples: Vec<ActivitySample>,
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
