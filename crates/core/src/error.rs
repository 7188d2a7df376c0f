// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-visible error taxonomy.
//!
//! Kinds travel over the wire and drive the job engine's retry decisions;
//! every layer error maps onto a `Fault` at the API boundary.

use crate::task::TaskKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable reason codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    AuthFailed,
    UnknownDevice,
    DeviceNotLive,
    NoEligibleDevice,
    UnsupportedTaskKind,
    LlmEndpointUnreachable,
    TaskTimeout,
    TooManyJobs,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// The wire reason code (matches the serde representation).
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AuthFailed => "auth_failed",
            ErrorKind::UnknownDevice => "unknown_device",
            ErrorKind::DeviceNotLive => "device_not_live",
            ErrorKind::NoEligibleDevice => "no_eligible_device",
            ErrorKind::UnsupportedTaskKind => "unsupported_task_kind",
            ErrorKind::LlmEndpointUnreachable => "llm_endpoint_unreachable",
            ErrorKind::TaskTimeout => "task_timeout",
            ErrorKind::TooManyJobs => "too_many_jobs",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a failed attempt of `kind` may be retried.
    ///
    /// Timeouts are transient for cheap meta tasks and permanent for
    /// compute tasks, which have already burned their budget once.
    pub fn is_transient_for(self, kind: TaskKind) -> bool {
        match self {
            ErrorKind::LlmEndpointUnreachable | ErrorKind::DeviceNotLive => true,
            ErrorKind::TaskTimeout => !kind.is_compute(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A reason code with its one-line human message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled")
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
