// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em server`: run a coordinator or a worker until signalled.

use anyhow::Context;
use clap::Args;
use em_coordinator::{Coordinator, CoordinatorConfig};
use em_core::Capability;
use em_worker::{WorkerAgent, WorkerConfig};
use std::collections::BTreeSet;
use tokio::signal::unix::{signal, SignalKind};

#[derive(Args)]
pub struct ServerArgs {
    /// Run as a worker instead of a coordinator
    #[arg(long)]
    pub worker: bool,

    /// Node name reported to the mesh (defaults to the hostname)
    #[arg(long)]
    pub name: Option<String>,

    /// Declare a gpu capability
    #[arg(long)]
    pub gpu: bool,

    /// Declare an npu capability
    #[arg(long)]
    pub npu: bool,

    /// Name of a locally served model, if any
    #[arg(long)]
    pub local_model: Option<String>,
}

fn node_name(args: &ServerArgs) -> String {
    args.name.clone().unwrap_or_else(|| {
        sysinfo_host_name().unwrap_or_else(|| "edgemesh-node".to_string())
    })
}

fn sysinfo_host_name() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
}

fn capabilities(args: &ServerArgs) -> BTreeSet<Capability> {
    let mut caps: BTreeSet<Capability> = [Capability::Cpu].into_iter().collect();
    if args.gpu {
        caps.insert(Capability::Gpu);
    }
    if args.npu {
        caps.insert(Capability::Npu);
    }
    if args.local_model.is_some() {
        caps.insert(Capability::LocalModel);
    }
    caps
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
    Ok(())
}

pub async fn run(args: ServerArgs) -> anyhow::Result<()> {
    if args.worker {
        run_worker(args).await
    } else {
        run_coordinator(args).await
    }
}

async fn run_worker(args: ServerArgs) -> anyhow::Result<()> {
    let mut config = WorkerConfig::from_env(node_name(&args));
    config.capabilities = capabilities(&args);
    config.local_model = args.local_model.clone();

    let agent = WorkerAgent::start(config).await.context("failed to start worker")?;
    println!("worker {} listening on {}", agent.device_id, agent.addr());

    wait_for_shutdown_signal().await?;
    agent.shutdown().await;
    Ok(())
}

async fn run_coordinator(args: ServerArgs) -> anyhow::Result<()> {
    // The coordinator hosts an embedded worker so fallback plans have a
    // local target; its identity doubles as the "local device" for
    // routing policies that care.
    let shared_dir = em_worker::env::shared_dir();
    let local_id =
        em_worker::autojoin::load_or_create_device_id(&shared_dir, &em_core::UuidIdGen)
            .context("failed to read device identity")?;

    let mut config = CoordinatorConfig::from_env();
    config.local_device_id = Some(local_id.clone());

    let coordinator = Coordinator::start(config).await.context("failed to start coordinator")?;
    let coordinator_addr = coordinator.addr();
    println!("coordinator listening on {coordinator_addr}");

    let mut worker_config = WorkerConfig::from_env(node_name(&args));
    worker_config.capabilities = capabilities(&args);
    worker_config.local_model = args.local_model.clone();
    worker_config.bind_addr = "0.0.0.0:0".to_string();
    worker_config.coordinator_addr = Some(format!("127.0.0.1:{}", coordinator_addr.port()));

    let embedded = WorkerAgent::start(worker_config).await.context("failed to start embedded worker")?;
    tracing::info!(device_id = %embedded.device_id, "embedded worker up");

    wait_for_shutdown_signal().await?;
    embedded.shutdown().await;
    coordinator.shutdown().await;
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
