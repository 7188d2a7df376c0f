// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{TaskHandler, WorkerContext};
use async_trait::async_trait;
use em_core::{Capability, Fault, SysinfoReport, Task};
use sysinfo::System;

/// Probes the local machine and returns a structured report.
pub struct SysinfoHandler;

/// Gather the report outside the trait so the heartbeat loop can reuse it.
pub fn collect(capabilities: &std::collections::BTreeSet<Capability>) -> SysinfoReport {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();

    SysinfoReport {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        total_ram_mb: sys.total_memory() / (1024 * 1024),
        used_ram_mb: sys.used_memory() / (1024 * 1024),
        cpu_load_pct: sys.global_cpu_usage(),
        has_gpu: capabilities.contains(&Capability::Gpu),
        has_npu: capabilities.contains(&Capability::Npu),
    }
}

#[async_trait]
impl TaskHandler for SysinfoHandler {
    async fn run(&self, _task: &Task, ctx: &WorkerContext) -> Result<String, Fault> {
        let report = collect(&ctx.capabilities);
        serde_json::to_string(&report).map_err(|e| Fault::internal(e.to_string()))
    }
}
