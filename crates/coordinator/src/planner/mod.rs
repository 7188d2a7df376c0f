// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan synthesis.
//!
//! Two strategies behind one interface: the deterministic keyword planner
//! (always available) and an optional LLM-backed planner that must produce
//! a plan the validator accepts, falling back to the deterministic one
//! otherwise.

mod ai;
mod smart;
mod validate;

pub use ai::AiPlanner;
pub use smart::SmartPlanner;
pub use validate::validate_plan;

use async_trait::async_trait;
use em_core::{Device, DeviceId, Fault, Plan, PlanRequest};

/// Read-only planning inputs: the registry snapshot at planning time.
pub struct PlanContext {
    pub devices: Vec<Device>,
    /// The coordinator's own device (fallback target), if registered.
    pub local_device: Option<DeviceId>,
}

impl PlanContext {
    /// Devices currently eligible for work.
    pub fn live_devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.is_routable())
    }
}

/// A plan synthesis strategy, selected at coordinator startup.
#[async_trait]
pub trait PlannerStrategy: Send + Sync {
    async fn plan(&self, request: &PlanRequest, ctx: &PlanContext) -> Result<Plan, Fault>;
}
