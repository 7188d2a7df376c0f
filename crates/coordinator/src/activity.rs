// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device activity table fed by heartbeat samples.

use em_core::{ActivityRing, ActivitySample, DeviceId};
use em_proto::DeviceActivity;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Rings keyed by device. Single writer per device (its heartbeat
/// handler); readers take snapshot copies.
#[derive(Default)]
pub struct ActivityTable {
    rings: Mutex<HashMap<DeviceId, ActivityRing>>,
}

impl ActivityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record samples piggybacked on a heartbeat. Returns how many were
    /// accepted (out-of-order samples are dropped, the ring is lossy).
    pub fn record(&self, device: &DeviceId, samples: Vec<ActivitySample>) -> usize {
        if samples.is_empty() {
            return 0;
        }
        let mut rings = self.rings.lock();
        let ring = rings.entry(device.clone()).or_default();
        samples.into_iter().filter(|s| ring.push(s.clone())).count()
    }

    /// Latest running-task count a device reported, if any.
    pub fn last_running_tasks(&self, device: &DeviceId) -> Option<u32> {
        self.rings.lock().get(device).and_then(|r| r.latest().map(|s| s.running_tasks))
    }

    /// Snapshot of every device's ring, oldest sample first.
    pub fn snapshot(&self) -> Vec<DeviceActivity> {
        let rings = self.rings.lock();
        let mut out: Vec<DeviceActivity> = rings
            .iter()
            .map(|(device_id, ring)| DeviceActivity {
                device_id: device_id.clone(),
                samples: ring.snapshot(),
            })
            .collect();
        out.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        out
    }

    /// Drop a device's ring (after it is evicted from the registry).
    pub fn forget(&self, device: &DeviceId) {
        self.rings.lock().remove(device);
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
