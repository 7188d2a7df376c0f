// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC protocol between coordinator and workers.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON envelope.
//! The envelope carries a version tag and the shared pre-shared key.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod control;
mod wire;
mod worker;

pub use client::{call_control, call_control_with_timeout};
pub use control::{
    ControlRequest, ControlResponse, DeviceActivity, JobView, RoutedOutcome, RunningTask,
};
pub use wire::{
    read_envelope, read_frame, write_envelope, write_frame, Envelope, ProtocolError,
    DIAL_TIMEOUT, MAX_FRAME_BYTES, RPC_TIMEOUT, WIRE_VERSION,
};
pub use worker::{WorkerRequest, WorkerResponse};
