// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LLM-backed planner.
//!
//! Sends the request, the registry snapshot, and the allowed task kinds
//! to an external planning endpoint and parses a structured plan back.
//! Anything short of a fully valid plan falls back to the deterministic
//! planner with `used_ai = false` and a note saying why.

use super::{validate_plan, PlanContext, PlannerStrategy, SmartPlanner};
use async_trait::async_trait;
use em_core::{Capability, DeviceId, Fault, Plan, PlanRequest, PlanTask, TaskKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const PLANNING_TIMEOUT: Duration = Duration::from_secs(20);

/// What the endpoint receives.
#[derive(Serialize)]
struct PlanningCall<'a> {
    request: &'a PlanRequest,
    devices: Vec<DeviceSketch>,
    allowed_kinds: Vec<String>,
}

#[derive(Serialize)]
struct DeviceSketch {
    id: DeviceId,
    name: String,
    capabilities: BTreeSet<Capability>,
    total_ram_mb: u64,
    live: bool,
}

/// What the endpoint must return. Kinds arrive as strings so an
/// out-of-vocabulary kind is a validation failure, not a parse panic.
#[derive(Deserialize)]
struct RawPlan {
    groups: Vec<Vec<RawTask>>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    notes: Vec<String>,
}

#[derive(Deserialize)]
struct RawTask {
    kind: String,
    #[serde(default)]
    input: String,
    #[serde(default)]
    device: Option<DeviceId>,
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
    #[serde(default)]
    bind_at_dispatch: bool,
    #[serde(default)]
    critical: Option<bool>,
}

/// Planner that consults an external LLM, with deterministic fallback.
pub struct AiPlanner {
    endpoint: String,
    client: reqwest::Client,
    fallback: SmartPlanner,
}

impl AiPlanner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), client: reqwest::Client::new(), fallback: SmartPlanner::new() }
    }

    async fn consult(&self, request: &PlanRequest, ctx: &PlanContext) -> Result<Plan, String> {
        let call = PlanningCall {
            request,
            devices: ctx
                .devices
                .iter()
                .map(|d| DeviceSketch {
                    id: d.id().clone(),
                    name: d.info.name.clone(),
                    capabilities: d.info.capabilities.clone(),
                    total_ram_mb: d.info.total_ram_mb,
                    live: d.is_routable(),
                })
                .collect(),
            allowed_kinds: TaskKind::PLANNABLE.iter().map(ToString::to_string).collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(PLANNING_TIMEOUT)
            .json(&call)
            .send()
            .await
            .map_err(|e| format!("planner endpoint unreachable: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("planner endpoint returned {}", response.status()));
        }

        let raw: RawPlan =
            response.json().await.map_err(|e| format!("unparseable plan: {e}"))?;
        let plan = lower(raw)?;
        validate_plan(&plan, ctx).map_err(|fault| format!("invalid plan: {fault}"))?;
        Ok(plan)
    }
}

/// Lower the wire shape into a validated-kind plan.
fn lower(raw: RawPlan) -> Result<Plan, String> {
    let mut groups = Vec::with_capacity(raw.groups.len());
    for raw_group in raw.groups {
        let mut group = Vec::with_capacity(raw_group.len());
        for raw_task in raw_group {
            let kind = TaskKind::parse(&raw_task.kind)
                .ok_or_else(|| format!("unknown task kind: {}", raw_task.kind))?;
            let mut task = PlanTask::new(kind, raw_task.input);
            task.device = raw_task.device;
            task.prompt_tokens = raw_task.prompt_tokens;
            task.output_tokens = raw_task.output_tokens;
            task.bind_at_dispatch = raw_task.bind_at_dispatch;
            if let Some(critical) = raw_task.critical {
                task.critical = critical;
            }
            group.push(task);
        }
        groups.push(group);
    }
    Ok(Plan { groups, rationale: raw.rationale, notes: raw.notes, used_ai: true })
}

#[async_trait]
impl PlannerStrategy for AiPlanner {
    async fn plan(&self, request: &PlanRequest, ctx: &PlanContext) -> Result<Plan, Fault> {
        match self.consult(request, ctx).await {
            Ok(plan) => Ok(plan),
            Err(why) => {
                tracing::warn!(error = %why, "ai planner failed, using smart planner");
                let mut plan = self.fallback.plan(request, ctx).await?;
                plan.used_ai = false;
                plan.notes.push(format!("ai planner fell back: {why}"));
                Ok(plan)
            }
        }
    }
}

#[cfg(test)]
#[path = "ai_tests.rs"]
mod tests;
