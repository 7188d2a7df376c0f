// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic maintenance loop: liveness demotions and job eviction.
//!
//! Runs as one spawned task with a cooperative stop token; the
//! coordinator drains it on shutdown before dropping the registry.

use crate::config::CoordinatorConfig;
use crate::engine::JobEngine;
use crate::registry::DeviceRegistry;
use em_core::{Clock, IdGen};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn the sweep loop. Every tick demotes silent devices and evicts
/// expired terminal jobs.
pub fn spawn<C: Clock, G: IdGen + 'static>(
    config: CoordinatorConfig,
    registry: Arc<DeviceRegistry<C>>,
    engine: JobEngine<C, G>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let demotions = registry.sweep(config.stale_after, config.lost_after);
                    if !demotions.is_empty() {
                        tracing::debug!(count = demotions.len(), "sweep demoted devices");
                    }
                    let evicted = engine.evict_expired();
                    if evicted > 0 {
                        tracing::debug!(count = evicted, "sweep evicted terminal jobs");
                    }
                }
            }
        }
        tracing::debug!("sweeper stopped");
    })
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
