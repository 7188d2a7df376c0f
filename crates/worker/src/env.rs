// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the worker.

use std::path::PathBuf;

/// Bind address for the worker's RPC server.
pub fn grpc_addr() -> String {
    std::env::var("GRPC_ADDR").unwrap_or_else(|_| "0.0.0.0:50051".to_string())
}

/// Coordinator to auto-register with on start, if any.
pub fn coordinator_addr() -> Option<String> {
    std::env::var("COORDINATOR_ADDR").ok().filter(|s| !s.is_empty())
}

/// Shared pre-shared key carried on every RPC.
pub fn psk() -> Option<String> {
    std::env::var("PSK").ok().filter(|s| !s.is_empty())
}

/// OpenAI-compatible endpoint used by llm_generate on this worker.
pub fn llm_endpoint() -> Option<String> {
    std::env::var("LLM_ENDPOINT").ok().filter(|s| !s.is_empty())
}

/// Local image generation endpoint used by image_generate.
pub fn image_api_endpoint() -> Option<String> {
    std::env::var("IMAGE_API_ENDPOINT").ok().filter(|s| !s.is_empty())
}

/// Directory for generated artifacts and the persisted device id.
pub fn shared_dir() -> PathBuf {
    std::env::var("SHARED_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./shared"))
}
