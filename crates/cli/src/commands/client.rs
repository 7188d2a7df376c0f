// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `em client`: one-shot calls against a running coordinator.

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use em_core::{Capability, DeviceId, RoutingPolicy, UuidIdGen};
use em_proto::{call_control_with_timeout, ControlRequest, ControlResponse};
use std::collections::BTreeSet;
use std::time::Duration;

/// Routed commands can take as long as a compute task.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(150);

#[derive(Subcommand)]
pub enum ClientCommand {
    /// Register a device manually
    Register(RegisterArgs),

    /// Run a one-shot routed command
    Run(RunArgs),
}

#[derive(Args)]
pub struct RegisterArgs {
    /// Coordinator address (host:port)
    #[arg(long, env = "COORDINATOR_ADDR")]
    pub coordinator: String,

    /// Device name
    #[arg(long)]
    pub name: String,

    /// Externally reachable address of the device's RPC server
    #[arg(long)]
    pub self_addr: String,

    /// Declare a cpu capability (always implied)
    #[arg(long)]
    pub cpu: bool,

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

#[derive(Args)]
pub struct RunArgs {
    /// Coordinator address (host:port)
    #[arg(long, env = "COORDINATOR_ADDR")]
    pub coordinator: String,

    /// Command to route
    #[arg(long)]
    pub cmd: String,

    /// Arguments for the command
    #[arg(long)]
    pub args: Vec<String>,

    /// Routing policy (best_available, prefer_remote, require_npu, ...)
    #[arg(long)]
    pub policy: Option<String>,

    /// Force a specific device id
    #[arg(long)]
    pub device_id: Option<String>,
}

pub async fn run(command: ClientCommand) -> anyhow::Result<()> {
    match command {
        ClientCommand::Register(args) => register(args).await,
        ClientCommand::Run(args) => routed_run(args).await,
    }
}

async fn register(args: RegisterArgs) -> anyhow::Result<()> {
    let mut capabilities: BTreeSet<Capability> = [Capability::Cpu].into_iter().collect();
    if args.gpu {
        capabilities.insert(Capability::Gpu);
    }
    if args.npu {
        capabilities.insert(Capability::Npu);
    }
    if args.local_model.is_some() {
        capabilities.insert(Capability::LocalModel);
    }

    let shared_dir = em_worker::env::shared_dir();
    let device_id = em_worker::autojoin::load_or_create_device_id(&shared_dir, &UuidIdGen)
        .context("failed to read device identity")?;
    let info = em_worker::autojoin::local_device_info(
        device_id,
        args.name,
        args.self_addr,
        capabilities,
        args.local_model,
    );

    let psk = em_worker::env::psk();
    let response = call_control_with_timeout(
        &args.coordinator,
        psk.as_deref(),
        &ControlRequest::Register { info },
        Duration::from_secs(10),
    )
    .await
    .context("register call failed")?;

    match response {
        ControlResponse::Registered { device_id, observed_addr } => {
            println!("registered {device_id} (reachable at {observed_addr})");
            Ok(())
        }
        ControlResponse::Error { fault } => bail!("register rejected: {fault}"),
        other => bail!("unexpected response: {other:?}"),
    }
}

pub(crate) fn parse_policy(
    policy: Option<&str>,
    device_id: Option<&str>,
) -> anyhow::Result<(RoutingPolicy, Option<DeviceId>)> {
    let forced = device_id.map(DeviceId::new);
    let policy = match policy {
        None if forced.is_some() => RoutingPolicy::ForceDeviceId,
        None => RoutingPolicy::BestAvailable,
        Some(raw) => RoutingPolicy::parse(raw)
            .with_context(|| format!("unknown routing policy: {raw}"))?,
    };
    if policy == RoutingPolicy::ForceDeviceId && forced.is_none() {
        bail!("--policy force_device_id requires --device-id");
    }
    Ok((policy, forced))
}

async fn routed_run(args: RunArgs) -> anyhow::Result<()> {
    let (policy, force_device_id) =
        parse_policy(args.policy.as_deref(), args.device_id.as_deref())?;

    let psk = em_worker::env::psk();
    let request = ControlRequest::RoutedCommand {
        command: args.cmd,
        args: args.args,
        policy,
        force_device_id,
    };
    let response =
        call_control_with_timeout(&args.coordinator, psk.as_deref(), &request, COMMAND_TIMEOUT)
            .await
            .context("routed command failed")?;

    match response {
        ControlResponse::Routed { outcome } => {
            if !outcome.stdout.is_empty() {
                println!("{}", outcome.stdout);
            }
            if !outcome.stderr.is_empty() {
                eprintln!("{}", outcome.stderr);
            }
            eprintln!(
                "ran on {} ({}) in {} ms",
                outcome.device_name, outcome.device_id, outcome.elapsed_ms
            );
            if outcome.exit_code != 0 {
                std::process::exit(outcome.exit_code);
            }
            Ok(())
        }
        ControlResponse::Error { fault } => bail!("{fault}"),
        other => bail!("unexpected response: {other:?}"),
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
