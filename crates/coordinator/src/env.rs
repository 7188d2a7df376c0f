// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the coordinator.

use std::time::Duration;

/// Bind address for the control-plane RPC listener.
pub fn grpc_addr() -> String {
    std::env::var("GRPC_ADDR").unwrap_or_else(|_| "0.0.0.0:50051".to_string())
}

/// Shared pre-shared key. When set, every RPC must carry it.
pub fn psk() -> Option<String> {
    std::env::var("PSK").ok().filter(|s| !s.is_empty())
}

/// Liveness sweep interval override (default 5s).
pub fn sweep_interval() -> Duration {
    std::env::var("EM_SWEEP_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// External planning LLM endpoint. When set, the AI-assisted planner is
/// tried first and falls back to the deterministic one.
pub fn planner_endpoint() -> Option<String> {
    std::env::var("EM_PLANNER_ENDPOINT").ok().filter(|s| !s.is_empty())
}
