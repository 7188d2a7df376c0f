// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory device registry.
//!
//! Read-heavy: routing and planning take snapshot copies, writers
//! serialize on the lock. No lock is ever held across an RPC.

use em_core::{Clock, Device, DeviceId, DeviceInfo, Event, Liveness};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),
}

impl From<RegistryError> for em_core::Fault {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownDevice(id) => {
                em_core::Fault::new(em_core::ErrorKind::UnknownDevice, format!("unknown device: {id}"))
            }
        }
    }
}

/// Device registry with heartbeat-driven liveness.
pub struct DeviceRegistry<C: Clock> {
    devices: RwLock<HashMap<DeviceId, Device>>,
    clock: C,
    events: broadcast::Sender<Event>,
}

impl<C: Clock> DeviceRegistry<C> {
    pub fn new(clock: C) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { devices: RwLock::new(HashMap::new()), clock, events }
    }

    /// Subscribe to registry events (joins, updates, liveness demotions).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine; the channel is observability only.
        let _ = self.events.send(event);
    }

    /// Idempotent by device id: a known id is an update, a new id an
    /// insert. Two different ids sharing an address are never coalesced.
    pub fn register(&self, info: DeviceInfo) -> DeviceId {
        let now = self.clock.epoch_ms();
        let id = info.id.clone();
        let event = {
            let mut devices = self.devices.write();
            match devices.get_mut(&id) {
                Some(existing) => {
                    existing.absorb(info, now);
                    Event::DeviceUpdated { id: id.clone() }
                }
                None => {
                    let event = Event::DeviceJoined {
                        id: id.clone(),
                        name: info.name.clone(),
                        addr: info.addr.clone(),
                    };
                    devices.insert(id.clone(), Device::new(info, now));
                    event
                }
            }
        };
        tracing::info!(device_id = %id, event = event.name(), "register");
        self.emit(event);
        id
    }

    /// Refresh liveness. Promotes STALE → LIVE; a LOST device must
    /// re-register to become routable again.
    pub fn heartbeat(&self, id: &DeviceId) -> Result<(), RegistryError> {
        let now = self.clock.epoch_ms();
        let mut devices = self.devices.write();
        let device = devices.get_mut(id).ok_or_else(|| RegistryError::UnknownDevice(id.clone()))?;
        let was = device.liveness;
        device.touch(now);
        if was == Liveness::Stale && device.liveness == Liveness::Live {
            drop(devices);
            self.emit(Event::LivenessChanged { id: id.clone(), from: was, to: Liveness::Live });
        }
        Ok(())
    }

    pub fn get(&self, id: &DeviceId) -> Result<Device, RegistryError> {
        self.devices.read().get(id).cloned().ok_or_else(|| RegistryError::UnknownDevice(id.clone()))
    }

    /// Snapshot copy of all devices, no locks leaked.
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        devices
    }

    /// Snapshot of devices currently eligible for routing.
    pub fn routable(&self) -> Vec<Device> {
        self.list().into_iter().filter(Device::is_routable).collect()
    }

    /// Explicit deregistration: the entry stays for history but stops
    /// receiving work.
    pub fn mark_lost(&self, id: &DeviceId) -> Result<(), RegistryError> {
        let mut devices = self.devices.write();
        let device = devices.get_mut(id).ok_or_else(|| RegistryError::UnknownDevice(id.clone()))?;
        let was = device.liveness;
        device.liveness = Liveness::Lost;
        drop(devices);
        if was != Liveness::Lost {
            self.emit(Event::LivenessChanged { id: id.clone(), from: was, to: Liveness::Lost });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// One liveness sweep: LIVE → STALE past `stale_after`, STALE → LOST
    /// past `lost_after`. Returns the demotions so the caller can react.
    pub fn sweep(&self, stale_after: Duration, lost_after: Duration) -> Vec<Event> {
        let now = self.clock.epoch_ms();
        let stale_ms = stale_after.as_millis() as u64;
        let lost_ms = lost_after.as_millis() as u64;

        let mut demotions = Vec::new();
        {
            let mut devices = self.devices.write();
            for device in devices.values_mut() {
                let silent_for = now.saturating_sub(device.last_seen_ms);
                let next = match device.liveness {
                    Liveness::Live | Liveness::Joining if silent_for >= stale_ms => Liveness::Stale,
                    Liveness::Stale if silent_for >= lost_ms => Liveness::Lost,
                    _ => continue,
                };
                let was = device.liveness;
                device.liveness = next;
                demotions.push(Event::LivenessChanged {
                    id: device.id().clone(),
                    from: was,
                    to: next,
                });
            }
        }
        for event in &demotions {
            if let Event::LivenessChanged { id, from, to } = event {
                tracing::info!(device_id = %id, %from, %to, "liveness demotion");
            }
            self.emit(event.clone());
        }
        demotions
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
