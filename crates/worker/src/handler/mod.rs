// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed task execution.
//!
//! Each task kind owns a handler; dispatch is a table lookup, and a kind
//! with no handler fails with `unsupported_task_kind`.

mod echo;
mod image;
mod llm;
pub(crate) mod sysinfo;

pub use echo::EchoHandler;
pub use image::ImageHandler;
pub use llm::LlmHandler;
pub use sysinfo::SysinfoHandler;

use async_trait::async_trait;
use em_core::{Capability, ErrorKind, Fault, Task, TaskKind, TaskResult};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Instant;

/// What handlers get to work with: the device's declared shape and its
/// configured local endpoints.
pub struct WorkerContext {
    pub capabilities: BTreeSet<Capability>,
    pub llm_endpoint: Option<String>,
    pub image_endpoint: Option<String>,
    pub shared_dir: PathBuf,
    pub http: reqwest::Client,
}

impl WorkerContext {
    pub fn new(
        capabilities: BTreeSet<Capability>,
        llm_endpoint: Option<String>,
        image_endpoint: Option<String>,
        shared_dir: PathBuf,
    ) -> Self {
        Self { capabilities, llm_endpoint, image_endpoint, shared_dir, http: reqwest::Client::new() }
    }
}

/// Executes one kind of task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &Task, ctx: &WorkerContext) -> Result<String, Fault>;
}

/// Handler table keyed by task kind.
pub struct HandlerSet {
    handlers: HashMap<TaskKind, Box<dyn TaskHandler>>,
}

impl HandlerSet {
    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// The standard worker surface: sysinfo, echo, llm, image.
    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.register(TaskKind::Sysinfo, Box::new(SysinfoHandler));
        set.register(TaskKind::Echo, Box::new(EchoHandler));
        set.register(TaskKind::LlmGenerate, Box::new(LlmHandler));
        set.register(TaskKind::ImageGenerate, Box::new(ImageHandler));
        set
    }

    pub fn register(&mut self, kind: TaskKind, handler: Box<dyn TaskHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run a task to a `TaskResult`, converting faults and timing the
    /// execution. Deadlines and cancellation are the server's job.
    pub async fn execute(&self, task: &Task, ctx: &WorkerContext) -> TaskResult {
        let started = Instant::now();
        let handler = match self.handlers.get(&task.kind) {
            Some(handler) => handler,
            None => {
                return TaskResult::fault(
                    Fault::new(
                        ErrorKind::UnsupportedTaskKind,
                        format!("no handler for task kind {}", task.kind),
                    ),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        match handler.run(task, ctx).await {
            Ok(result) => TaskResult::ok(result, started.elapsed().as_millis() as u64),
            Err(fault) => TaskResult::fault(fault, started.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
