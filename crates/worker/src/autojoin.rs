// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auto-join: identity, registration, and the heartbeat loop.
//!
//! The device id is minted once and persisted next to the shared
//! directory so restarts re-register instead of duplicating the entry.

use crate::handler::sysinfo::collect;
use crate::server::ServerState;
use em_core::{
    ActivitySample, Capability, Clock, DeviceId, DeviceInfo, IdGen, Platform, SystemClock,
};
use em_proto::{call_control, ControlRequest, ControlResponse};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEVICE_ID_FILE: &str = "device_id";

/// Default heartbeat cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Read the persisted device id, minting and persisting one if absent.
pub fn load_or_create_device_id(
    shared_dir: &Path,
    ids: &impl IdGen,
) -> std::io::Result<DeviceId> {
    let path = shared_dir.join(DEVICE_ID_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let id = contents.trim();
            if !id.is_empty() {
                return Ok(DeviceId::new(id));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let id = DeviceId::new(ids.next());
    std::fs::create_dir_all(shared_dir)?;
    std::fs::write(&path, format!("{id}\n"))?;
    info!(device_id = %id, "minted new device identity");
    Ok(id)
}

fn platform() -> Platform {
    match std::env::consts::OS {
        "macos" => Platform::Darwin,
        "windows" => Platform::Windows,
        "android" => Platform::Android,
        _ => Platform::Linux,
    }
}

fn arch() -> em_core::device::Arch {
    match std::env::consts::ARCH {
        "aarch64" => em_core::device::Arch::Arm64,
        "arm" => em_core::device::Arch::Arm,
        _ => em_core::device::Arch::Amd64,
    }
}

/// Build the registration payload for this machine.
pub fn local_device_info(
    id: DeviceId,
    name: impl Into<String>,
    addr: impl Into<String>,
    capabilities: BTreeSet<Capability>,
    local_model: Option<String>,
) -> DeviceInfo {
    let report = collect(&capabilities);
    DeviceInfo {
        id,
        name: name.into(),
        platform: platform(),
        arch: arch(),
        addr: addr.into(),
        capabilities,
        total_ram_mb: report.total_ram_mb,
        local_model,
    }
}

/// Register with the coordinator. Returns the address the coordinator
/// observed, which replaces a wildcard self-reported one.
pub async fn register(
    coordinator_addr: &str,
    psk: Option<&str>,
    info: &DeviceInfo,
) -> Result<String, String> {
    let response = call_control(
        coordinator_addr,
        psk,
        &ControlRequest::Register { info: info.clone() },
    )
    .await
    .map_err(|e| format!("register failed: {e}"))?;

    match response {
        ControlResponse::Registered { device_id, observed_addr } => {
            info!(%device_id, %observed_addr, "registered with coordinator");
            Ok(observed_addr)
        }
        ControlResponse::Error { fault } => Err(format!("register rejected: {fault}")),
        other => Err(format!("unexpected register response: {other:?}")),
    }
}

/// Heartbeat every `interval` with one activity sample piggybacked.
/// Re-registers when the coordinator forgot us (restart, eviction).
pub fn spawn_heartbeat(
    coordinator_addr: String,
    psk: Option<String>,
    info: DeviceInfo,
    state: Arc<ServerState>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let clock = SystemClock;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let report = collect(&info.capabilities);
                    let sample = ActivitySample {
                        at_ms: clock.epoch_ms(),
                        cpu_load_pct: report.cpu_load_pct,
                        mem_used_mb: report.used_ram_mb,
                        gpu_load_pct: None,
                        npu_load_pct: None,
                        running_tasks: state.running_count() as u32,
                    };
                    let request = ControlRequest::Heartbeat {
                        device_id: info.id.clone(),
                        samples: vec![sample],
                    };
                    match call_control(&coordinator_addr, psk.as_deref(), &request).await {
                        Ok(ControlResponse::Ok) => debug!("heartbeat ok"),
                        Ok(ControlResponse::Error { fault })
                            if fault.kind == em_core::ErrorKind::UnknownDevice =>
                        {
                            warn!("coordinator forgot us, re-registering");
                            if let Err(e) = register(&coordinator_addr, psk.as_deref(), &info).await {
                                warn!(error = %e, "re-register failed");
                            }
                        }
                        Ok(other) => warn!(response = ?other, "unexpected heartbeat response"),
                        Err(e) => warn!(error = %e, "heartbeat failed"),
                    }
                }
            }
        }
        debug!("heartbeat loop stopped");
    })
}

#[cfg(test)]
#[path = "autojoin_tests.rs"]
mod tests;
