// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker agent lifecycle: server + auto-join wired together.

use crate::autojoin::{self, HEARTBEAT_INTERVAL};
use crate::handler::{HandlerSet, WorkerContext};
use crate::server::{ServerState, WorkerServer};
use em_core::{Capability, DeviceId, UuidIdGen};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything a worker needs to come up.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Human name reported to the coordinator.
    pub name: String,
    /// Bind address for the RPC server.
    pub bind_addr: String,
    /// Coordinator to auto-register with; `None` runs standalone.
    pub coordinator_addr: Option<String>,
    pub psk: Option<String>,
    pub capabilities: BTreeSet<Capability>,
    pub local_model: Option<String>,
    pub shared_dir: PathBuf,
    pub llm_endpoint: Option<String>,
    pub image_endpoint: Option<String>,
    pub heartbeat_interval: Duration,
}

impl WorkerConfig {
    /// Config populated from the environment, with cpu as
    /// the baseline capability.
    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind_addr: crate::env::grpc_addr(),
            coordinator_addr: crate::env::coordinator_addr(),
            psk: crate::env::psk(),
            capabilities: [Capability::Cpu].into_iter().collect(),
            local_model: None,
            shared_dir: crate::env::shared_dir(),
            llm_endpoint: crate::env::llm_endpoint(),
            image_endpoint: crate::env::image_api_endpoint(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// A running worker agent.
pub struct WorkerAgent {
    pub device_id: DeviceId,
    server: WorkerServer,
    stop: CancellationToken,
    heartbeat: Option<JoinHandle<()>>,
}

impl WorkerAgent {
    /// Bind the RPC server, then register and start heartbeating when a
    /// coordinator address is configured.
    pub async fn start(config: WorkerConfig) -> std::io::Result<Self> {
        let device_id = autojoin::load_or_create_device_id(&config.shared_dir, &UuidIdGen)?;

        let ctx = WorkerContext::new(
            config.capabilities.clone(),
            config.llm_endpoint.clone(),
            config.image_endpoint.clone(),
            config.shared_dir.clone(),
        );
        let state = Arc::new(ServerState::new(HandlerSet::standard(), ctx, config.psk.clone()));
        let server = WorkerServer::start(&config.bind_addr, Arc::clone(&state)).await?;

        let stop = CancellationToken::new();
        let mut heartbeat = None;

        if let Some(coordinator_addr) = &config.coordinator_addr {
            // Report the actually-bound address; the coordinator rewrites
            // a wildcard host to the source address it observed.
            let mut info = autojoin::local_device_info(
                device_id.clone(),
                config.name.clone(),
                server.addr().to_string(),
                config.capabilities.clone(),
                config.local_model.clone(),
            );
            match autojoin::register(coordinator_addr, config.psk.as_deref(), &info).await {
                Ok(observed_addr) => info.addr = observed_addr,
                Err(e) => tracing::warn!(error = %e, "initial registration failed, heartbeat will retry"),
            }
            heartbeat = Some(autojoin::spawn_heartbeat(
                coordinator_addr.clone(),
                config.psk.clone(),
                info,
                state,
                config.heartbeat_interval,
                stop.clone(),
            ));
        }

        Ok(Self { device_id, server, stop, heartbeat })
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.server.addr()
    }

    /// Stop heartbeating first, then the server.
    pub async fn shutdown(self) {
        self.stop.cancel();
        if let Some(heartbeat) = self.heartbeat {
            let _ = heartbeat.await;
        }
        self.server.shutdown().await;
    }
}
