// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device identity, capabilities, and liveness.
//!
//! A device's id is assigned by the device itself on first start and is
//! stable across re-registrations. Everything else (address, capabilities,
//! declared RAM, local model) is mutable and refreshed on each register.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

crate::define_id! {
    /// Stable identifier for a worker device (UUID, device-assigned).
    pub struct DeviceId;
}

/// Operating system family a device runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Darwin,
    Linux,
    Windows,
    Android,
    Arduino,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Platform::Darwin => "darwin",
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Android => "android",
            Platform::Arduino => "arduino",
        })
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Arm64,
    Amd64,
    Arm,
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Arch::Arm64 => "arm64",
            Arch::Amd64 => "amd64",
            Arch::Arm => "arm",
        })
    }
}

/// A declared hardware feature used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Cpu,
    Gpu,
    Npu,
    Screen,
    LocalModel,
    Camera,
}

impl Capability {
    /// Compute-tier rank for tie-breaking: npu > gpu > cpu.
    /// Non-compute capabilities rank below all compute tiers.
    pub fn tier_rank(self) -> u8 {
        match self {
            Capability::Npu => 3,
            Capability::Gpu => 2,
            Capability::Cpu => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Capability::Cpu => "cpu",
            Capability::Gpu => "gpu",
            Capability::Npu => "npu",
            Capability::Screen => "screen",
            Capability::LocalModel => "local_model",
            Capability::Camera => "camera",
        })
    }
}

/// Heartbeat-driven liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Joining,
    Live,
    Stale,
    Lost,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Liveness::Joining => "joining",
            Liveness::Live => "live",
            Liveness::Stale => "stale",
            Liveness::Lost => "lost",
        })
    }
}

/// What a device reports about itself when registering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub platform: Platform,
    pub arch: Arch,
    /// Externally reachable address (never 0.0.0.0).
    pub addr: String,
    pub capabilities: BTreeSet<Capability>,
    pub total_ram_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_model: Option<String>,
}

impl DeviceInfo {
    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// Registry entry: immutable identity plus mutable registration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub info: DeviceInfo,
    pub last_seen_ms: u64,
    pub liveness: Liveness,
}

impl Device {
    pub fn new(info: DeviceInfo, epoch_ms: u64) -> Self {
        Self { info, last_seen_ms: epoch_ms, liveness: Liveness::Live }
    }

    pub fn id(&self) -> &DeviceId {
        &self.info.id
    }

    pub fn is_live(&self) -> bool {
        self.liveness == Liveness::Live
    }

    /// Whether the device may be assigned work.
    pub fn is_routable(&self) -> bool {
        self.liveness == Liveness::Live
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.info.has(cap)
    }

    /// The device's best compute tier (npu over gpu over cpu).
    pub fn compute_tier(&self) -> u8 {
        self.info.capabilities.iter().map(|c| c.tier_rank()).max().unwrap_or(0)
    }

    /// Apply a re-registration: refresh mutable fields, keep identity.
    pub fn absorb(&mut self, info: DeviceInfo, epoch_ms: u64) {
        debug_assert_eq!(self.info.id, info.id);
        self.info = info;
        self.last_seen_ms = epoch_ms;
        self.liveness = Liveness::Live;
    }

    /// Record a heartbeat. Promotes stale devices back to live; a lost
    /// device stays lost until it re-registers.
    pub fn touch(&mut self, epoch_ms: u64) {
        self.last_seen_ms = epoch_ms;
        if self.liveness == Liveness::Stale || self.liveness == Liveness::Joining {
            self.liveness = Liveness::Live;
        }
    }
}

/// Test builder with workable defaults: a live linux/amd64 cpu box.
#[cfg(any(test, feature = "test-support"))]
pub struct DeviceBuilder {
    info: DeviceInfo,
    last_seen_ms: u64,
    liveness: Liveness,
}

#[cfg(any(test, feature = "test-support"))]
impl DeviceBuilder {
    pub fn id(mut self, id: impl Into<DeviceId>) -> Self {
        self.info.id = id.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.info.addr = addr.into();
        self
    }

    pub fn capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.info.capabilities = caps.into_iter().collect();
        self
    }

    pub fn total_ram_mb(mut self, mb: u64) -> Self {
        self.info.total_ram_mb = mb;
        self
    }

    pub fn local_model(mut self, model: impl Into<String>) -> Self {
        self.info.local_model = Some(model.into());
        self
    }

    pub fn last_seen_ms(mut self, ms: u64) -> Self {
        self.last_seen_ms = ms;
        self
    }

    pub fn liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn info(self) -> DeviceInfo {
        self.info
    }

    pub fn build(self) -> Device {
        Device { info: self.info, last_seen_ms: self.last_seen_ms, liveness: self.liveness }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for DeviceBuilder {
    fn default() -> Self {
        Self {
            info: DeviceInfo {
                id: DeviceId::new("dev-1"),
                name: "test-device".to_string(),
                platform: Platform::Linux,
                arch: Arch::Amd64,
                addr: "127.0.0.1:50052".to_string(),
                capabilities: [Capability::Cpu].into_iter().collect(),
                total_ram_mb: 16_384,
                local_model: None,
            },
            last_seen_ms: 0,
            liveness: Liveness::Live,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Device {
    /// Create a builder with test defaults.
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
