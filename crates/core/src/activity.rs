// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling per-device activity samples.
//!
//! Workers piggyback samples on heartbeats; the coordinator keeps a
//! bounded ring per device. The ring is lossy, and readers always observe
//! non-decreasing sample timestamps: a sample older than the newest one
//! already recorded is dropped rather than spliced in.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Samples retained per device (at ~2 s cadence this covers two minutes).
pub const ACTIVITY_RING_CAPACITY: usize = 60;

/// One utilization sample from a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub at_ms: u64,
    pub cpu_load_pct: f32,
    pub mem_used_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_load_pct: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npu_load_pct: Option<f32>,
    #[serde(default)]
    pub running_tasks: u32,
}

/// Fixed-capacity sample history for one device. Single writer (the
/// heartbeat handler); snapshots are copies so readers never hold the lock.
#[derive(Debug, Clone, Default)]
pub struct ActivityRing {
    samples: VecDeque<ActivitySample>,
}

impl ActivityRing {
    pub fn new() -> Self {
        Self { samples: VecDeque::with_capacity(ACTIVITY_RING_CAPACITY) }
    }

    /// Append a sample, evicting the oldest at capacity. Returns false if
    /// the sample was dropped for violating timestamp monotonicity.
    pub fn push(&mut self, sample: ActivitySample) -> bool {
        if let Some(newest) = self.samples.back() {
            if sample.at_ms < newest.at_ms {
                return false;
            }
        }
        if self.samples.len() == ACTIVITY_RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&ActivitySample> {
        self.samples.back()
    }

    /// Oldest-to-newest copy of the ring.
    pub fn snapshot(&self) -> Vec<ActivitySample> {
        self.samples.iter().cloned().collect()
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
