// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cost estimation: predicted latency and memory per (task, device).

use em_core::{Capability, CostEstimate, Device, DeviceId, PlanTask, TaskKind};
use std::collections::HashMap;

/// Throughput profile for one compute tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputProfile {
    pub prefill_tps: f64,
    pub decode_tps: f64,
    pub image_base_ms: u64,
    /// Multiplier applied to `image_base_ms`.
    pub image_scale: f64,
}

pub const NPU_PROFILE: ThroughputProfile =
    ThroughputProfile { prefill_tps: 300.0, decode_tps: 30.0, image_base_ms: 15_000, image_scale: 1.0 };
pub const GPU_PROFILE: ThroughputProfile =
    ThroughputProfile { prefill_tps: 180.0, decode_tps: 20.0, image_base_ms: 25_000, image_scale: 1.5 };
pub const CPU_PROFILE: ThroughputProfile =
    ThroughputProfile { prefill_tps: 60.0, decode_tps: 8.0, image_base_ms: 45_000, image_scale: 3.0 };

/// Fixed cost for meta tasks (sysinfo, echo).
const META_TASK_MS: u64 = 50;

/// RAM baselines (MB). The LLM figure assumes small-quantized 7–8B models.
const META_RAM_MB: u64 = 64;
const LLM_RAM_MB: u64 = 2_048;
const IMAGE_RAM_MB: u64 = 4_096;

/// A device may use at most this share of its declared RAM for one task.
const RAM_HEADROOM: f64 = 0.75;

/// Default token estimates when the planner left them unset.
const DEFAULT_PROMPT_TOKENS: u32 = 16;
const DEFAULT_OUTPUT_TOKENS: u32 = 200;

fn tier_name(tier: u8) -> &'static str {
    match tier {
        3 => "npu",
        2 => "gpu",
        _ => "cpu",
    }
}

/// Latency/RAM predictor with optional per-device profile overrides.
#[derive(Default)]
pub struct CostEstimator {
    overrides: HashMap<DeviceId, ThroughputProfile>,
}

impl CostEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a measured profile for one device, replacing the tier lookup.
    pub fn set_override(&mut self, device: DeviceId, profile: ThroughputProfile) {
        self.overrides.insert(device, profile);
    }

    fn profile_for(&self, device: &Device) -> ThroughputProfile {
        if let Some(profile) = self.overrides.get(device.id()) {
            return *profile;
        }
        match device.compute_tier() {
            3 => NPU_PROFILE,
            2 => GPU_PROFILE,
            _ => CPU_PROFILE,
        }
    }

    /// Predict cost for running `task` on `device`.
    pub fn estimate(&self, task: &PlanTask, device: &Device) -> CostEstimate {
        let profile = self.profile_for(device);
        let tier = tier_name(device.compute_tier());

        let (predicted_ms, predicted_ram_mb, basis) = match task.kind {
            TaskKind::LlmGenerate => {
                let prompt = f64::from(task.prompt_tokens.unwrap_or(DEFAULT_PROMPT_TOKENS));
                let output = f64::from(task.output_tokens.unwrap_or(DEFAULT_OUTPUT_TOKENS));
                let secs = prompt / profile.prefill_tps + output / profile.decode_tps;
                let ms = (secs * 1_000.0).round() as u64;
                let ram = task.ram_mb.unwrap_or(LLM_RAM_MB);
                (ms, ram, format!("{tier} prefill {:.0} tok/s", profile.prefill_tps))
            }
            TaskKind::ImageGenerate => {
                let ms = (profile.image_base_ms as f64 * profile.image_scale).round() as u64;
                let ram = task.ram_mb.unwrap_or(IMAGE_RAM_MB);
                (ms, ram, format!("{tier} image base {} ms", profile.image_base_ms))
            }
            _ => (META_TASK_MS, task.ram_mb.unwrap_or(META_RAM_MB), "meta task".to_string()),
        };

        let budget = (device.info.total_ram_mb as f64 * RAM_HEADROOM) as u64;
        let ram_sufficient = predicted_ram_mb <= budget;
        let reason = if ram_sufficient {
            basis
        } else {
            format!("{basis}; needs {predicted_ram_mb} MB, budget {budget} MB")
        };

        CostEstimate::new(predicted_ms, predicted_ram_mb, ram_sufficient, reason)
    }

    /// Pick the best device for `task` among `candidates`.
    ///
    /// Smallest predicted latency among devices with sufficient RAM and
    /// all required capabilities; ties break by compute tier (npu > gpu >
    /// cpu), then by lowest current running-task count.
    pub fn recommend(
        &self,
        task: &PlanTask,
        candidates: &[Device],
        running: &dyn Fn(&DeviceId) -> usize,
    ) -> Result<(DeviceId, CostEstimate), String> {
        let mut best: Option<(&Device, CostEstimate, usize)> = None;
        let mut rejections: Vec<String> = Vec::new();

        for device in candidates {
            if let Some(missing) =
                task.required_caps.iter().find(|cap| !device.has(**cap))
            {
                rejections.push(format!("{} lacks {missing}", device.info.name));
                continue;
            }
            let estimate = self.estimate(task, device);
            if !estimate.ram_sufficient {
                rejections.push(format!("{}: {}", device.info.name, estimate.reason));
                continue;
            }
            let load = running(device.id());
            let better = match &best {
                None => true,
                Some((incumbent, current, incumbent_load)) => {
                    (estimate.predicted_ms, std::cmp::Reverse(device.compute_tier()), load)
                        < (current.predicted_ms, std::cmp::Reverse(incumbent.compute_tier()), *incumbent_load)
                }
            };
            if better {
                best = Some((device, estimate, load));
            }
        }

        match best {
            Some((device, estimate, _)) => Ok((device.id().clone(), estimate)),
            None if candidates.is_empty() => Err("no live devices".to_string()),
            None => Err(rejections.join("; ")),
        }
    }
}

#[cfg(test)]
#[path = "cost_tests.rs"]
mod tests;
