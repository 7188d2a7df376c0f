// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plans and routing policies.
//!
//! A plan is the planner's output before a job exists: the same group
//! shape a job will execute, plus the rationale for it. Plans may be
//! previewed without ever being submitted.

use crate::device::{Capability, DeviceId};
use crate::task::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Caller-specified rule constraining device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    #[default]
    BestAvailable,
    PreferRemote,
    RequireNpu,
    PreferLocalModel,
    RequireLocalModel,
    ForceDeviceId,
}

impl RoutingPolicy {
    pub fn parse(s: &str) -> Option<RoutingPolicy> {
        match s {
            "best_available" | "BEST_AVAILABLE" => Some(RoutingPolicy::BestAvailable),
            "prefer_remote" | "PREFER_REMOTE" => Some(RoutingPolicy::PreferRemote),
            "require_npu" | "REQUIRE_NPU" => Some(RoutingPolicy::RequireNpu),
            "prefer_local_model" | "PREFER_LOCAL_MODEL" => Some(RoutingPolicy::PreferLocalModel),
            "require_local_model" | "REQUIRE_LOCAL_MODEL" => Some(RoutingPolicy::RequireLocalModel),
            "force_device_id" | "FORCE_DEVICE_ID" => Some(RoutingPolicy::ForceDeviceId),
            _ => None,
        }
    }
}

impl std::fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RoutingPolicy::BestAvailable => "best_available",
            RoutingPolicy::PreferRemote => "prefer_remote",
            RoutingPolicy::RequireNpu => "require_npu",
            RoutingPolicy::PreferLocalModel => "prefer_local_model",
            RoutingPolicy::RequireLocalModel => "require_local_model",
            RoutingPolicy::ForceDeviceId => "force_device_id",
        })
    }
}

/// A user-level request before planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub policy: RoutingPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_capabilities: BTreeSet<Capability>,
}

impl PlanRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            max_workers: None,
            policy: RoutingPolicy::default(),
            force_device_id: None,
            required_capabilities: BTreeSet::new(),
        }
    }
}

/// One planned task, pre-assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTask {
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
    /// Pre-routed target; `None` leaves routing to submission (or to
    /// dispatch when `bind_at_dispatch` is set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    #[serde(default)]
    pub bind_at_dispatch: bool,
    #[serde(default = "default_critical")]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reroute_on_failure: Option<bool>,
}

fn default_critical() -> bool {
    true
}

impl PlanTask {
    pub fn new(kind: TaskKind, input: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.into(),
            required_caps: BTreeSet::new(),
            prompt_tokens: None,
            output_tokens: None,
            ram_mb: None,
            device: None,
            bind_at_dispatch: false,
            critical: true,
            reroute_on_failure: None,
        }
    }

    /// Effective reroute flag: explicit override or the kind's default.
    pub fn reroutes(&self) -> bool {
        self.reroute_on_failure.unwrap_or_else(|| self.kind.reroutes_by_default())
    }
}

/// Planner output: groups run sequentially, tasks in a group in parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub groups: Vec<Vec<PlanTask>>,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default)]
    pub used_ai: bool,
}

impl Plan {
    pub fn single(task: PlanTask, rationale: impl Into<String>) -> Self {
        Self { groups: vec![vec![task]], rationale: rationale.into(), notes: Vec::new(), used_ai: false }
    }

    pub fn task_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &PlanTask> {
        self.groups.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
