// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability-aware device selection.
//!
//! Consumes the estimator's recommendation plus the caller's policy.
//! All policies treat non-LIVE devices as ineligible.

use crate::cost::CostEstimator;
use em_core::{Capability, Device, DeviceId, ErrorKind, Fault, PlanTask, RoutingPolicy};

/// Everything a routing decision needs, captured at one point in time.
pub struct RouteContext<'a> {
    /// Full registry snapshot (any liveness).
    pub devices: &'a [Device],
    pub estimator: &'a CostEstimator,
    /// Current running-task count per device (for tie-breaking).
    pub running: &'a dyn Fn(&DeviceId) -> usize,
    /// The coordinator's own device, if it runs an embedded worker.
    pub local_device: Option<&'a DeviceId>,
}

/// Select a device for `task` under `policy`.
pub fn select(
    ctx: &RouteContext<'_>,
    task: &PlanTask,
    policy: RoutingPolicy,
    forced: Option<&DeviceId>,
) -> Result<DeviceId, Fault> {
    let live: Vec<Device> = ctx.devices.iter().filter(|d| d.is_routable()).cloned().collect();

    match policy {
        RoutingPolicy::ForceDeviceId => {
            let id = forced.ok_or_else(|| {
                Fault::bad_request("force_device_id policy requires a device id")
            })?;
            let known = ctx.devices.iter().find(|d| d.id() == id);
            match known {
                None => Err(Fault::new(ErrorKind::UnknownDevice, format!("unknown device: {id}"))),
                Some(device) if !device.is_routable() => Err(Fault::new(
                    ErrorKind::DeviceNotLive,
                    format!("device {} is {}", id, device.liveness),
                )),
                // Forced selection skips the cost gate on purpose.
                Some(_) => Ok(id.clone()),
            }
        }

        RoutingPolicy::BestAvailable => recommend(ctx, task, &live),

        RoutingPolicy::RequireNpu => {
            let npu: Vec<Device> =
                live.iter().filter(|d| d.has(Capability::Npu)).cloned().collect();
            if npu.is_empty() {
                return Err(Fault::new(ErrorKind::NoEligibleDevice, "no npu-capable device is live"));
            }
            recommend(ctx, task, &npu)
        }

        RoutingPolicy::PreferRemote => {
            let choice = recommend(ctx, task, &live)?;
            let is_local = ctx.local_device.is_some_and(|local| *local == choice);
            if !is_local {
                return Ok(choice);
            }
            let remote: Vec<Device> =
                live.iter().filter(|d| Some(d.id()) != ctx.local_device).cloned().collect();
            match recommend(ctx, task, &remote) {
                Ok(remote_choice) => Ok(remote_choice),
                // No eligible remote: the local recommendation stands.
                Err(_) => Ok(choice),
            }
        }

        RoutingPolicy::PreferLocalModel | RoutingPolicy::RequireLocalModel => {
            let with_model: Vec<Device> =
                live.iter().filter(|d| d.info.local_model.is_some()).cloned().collect();
            match recommend(ctx, task, &with_model) {
                Ok(choice) => Ok(choice),
                Err(fault) if policy == RoutingPolicy::RequireLocalModel => Err(Fault::new(
                    ErrorKind::NoEligibleDevice,
                    format!("no device with a local model qualifies: {}", fault.message),
                )),
                // PREFER falls back to the unrestricted pool.
                Err(_) => recommend(ctx, task, &live),
            }
        }
    }
}

fn recommend(
    ctx: &RouteContext<'_>,
    task: &PlanTask,
    candidates: &[Device],
) -> Result<DeviceId, Fault> {
    ctx.estimator
        .recommend(task, candidates, ctx.running)
        .map(|(id, estimate)| {
            tracing::debug!(
                device_id = %id,
                predicted_ms = estimate.predicted_ms,
                reason = %estimate.reason,
                "routed"
            );
            id
        })
        .map_err(|reason| Fault::new(ErrorKind::NoEligibleDevice, reason))
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
