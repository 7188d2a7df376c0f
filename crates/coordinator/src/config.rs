// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator tuning knobs. Every knob has a production default; tests
//! shrink the intervals to keep wall-clock time down.

use em_core::DeviceId;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bind address for the control-plane listener.
    pub bind_addr: String,
    /// Shared pre-shared key; `None` disables auth.
    pub psk: Option<String>,
    /// The coordinator's own device entry, if it runs an embedded worker.
    /// Used by the planner fallback and PREFER_REMOTE.
    pub local_device_id: Option<DeviceId>,
    /// Liveness sweep cadence.
    pub sweep_interval: Duration,
    /// LIVE → STALE threshold since last heartbeat.
    pub stale_after: Duration,
    /// STALE → LOST threshold since last heartbeat.
    pub lost_after: Duration,
    /// Terminal jobs are evicted after this window.
    pub job_retention: Duration,
    /// Transient-failure retries per task (attempts = retries + 1).
    pub task_retries: u32,
    /// Backoff schedule between attempts; the last entry repeats.
    pub retry_backoff: Vec<Duration>,
    /// Concurrent in-flight calls per worker.
    pub per_worker_window: usize,
    /// Non-terminal jobs admitted before SubmitJob returns TooManyJobs.
    pub max_active_jobs: usize,
    /// Slack added on top of the longest task deadline when awaiting a group.
    pub group_await_slack: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:50051".to_string(),
            psk: None,
            local_device_id: None,
            sweep_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(15),
            lost_after: Duration::from_secs(60),
            job_retention: Duration::from_secs(30 * 60),
            task_retries: 2,
            retry_backoff: vec![Duration::from_millis(250), Duration::from_secs(1)],
            per_worker_window: 4,
            max_active_jobs: 64,
            group_await_slack: Duration::from_secs(5),
        }
    }
}

impl CoordinatorConfig {
    /// Config populated from the environment.
    pub fn from_env() -> Self {
        Self {
            bind_addr: crate::env::grpc_addr(),
            psk: crate::env::psk(),
            sweep_interval: crate::env::sweep_interval(),
            ..Self::default()
        }
    }

    /// Backoff before retry attempt `n` (1-based).
    pub fn backoff_for_attempt(&self, n: u32) -> Duration {
        let idx = (n.saturating_sub(1)) as usize;
        self.retry_backoff
            .get(idx)
            .or_else(|| self.retry_backoff.last())
            .copied()
            .unwrap_or(Duration::from_millis(250))
    }
}
