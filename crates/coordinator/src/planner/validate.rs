// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan validation, applied to every plan before submission.

use super::PlanContext;
use em_core::{task::MAX_INPUT_BYTES, ErrorKind, Fault, Plan, TaskKind};

/// Accept the plannable kinds only, require assigned devices to exist in
/// the snapshot the planner saw, and bound task inputs.
pub fn validate_plan(plan: &Plan, ctx: &PlanContext) -> Result<(), Fault> {
    if plan.is_empty() {
        return Err(Fault::bad_request("plan has no tasks"));
    }
    if plan.groups.iter().any(Vec::is_empty) {
        return Err(Fault::bad_request("plan has an empty group"));
    }

    for task in plan.tasks() {
        if !TaskKind::PLANNABLE.contains(&task.kind) {
            return Err(Fault::new(
                ErrorKind::UnsupportedTaskKind,
                format!("task kind {} is not plannable", task.kind),
            ));
        }
        if task.input.len() > MAX_INPUT_BYTES {
            return Err(Fault::bad_request(format!(
                "task input exceeds {} bytes",
                MAX_INPUT_BYTES
            )));
        }
        if let Some(device) = &task.device {
            if !ctx.devices.iter().any(|d| d.id() == device) {
                return Err(Fault::new(
                    ErrorKind::UnknownDevice,
                    format!("plan references unknown device: {device}"),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
