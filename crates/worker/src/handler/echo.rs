// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{TaskHandler, WorkerContext};
use async_trait::async_trait;
use em_core::{Fault, Task};

/// Returns the input verbatim.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn run(&self, task: &Task, _ctx: &WorkerContext) -> Result<String, Fault> {
        Ok(task.input.clone())
    }
}
