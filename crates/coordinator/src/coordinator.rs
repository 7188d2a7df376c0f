// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level coordinator wiring and lifecycle.
//!
//! Process-wide state is limited to the config, registry, job table, and
//! activity rings; everything is initialized here and torn down in
//! reverse order on shutdown.

use crate::activity::ActivityTable;
use crate::config::CoordinatorConfig;
use crate::cost::CostEstimator;
use crate::engine::JobEngine;
use crate::listener::{self, ListenCtx};
use crate::planner::{AiPlanner, PlannerStrategy, SmartPlanner};
use crate::registry::DeviceRegistry;
use crate::sweeper;
use crate::transport::TcpTransport;
use em_core::{Clock, IdGen, SystemClock, UuidIdGen};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for in-flight jobs before giving up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running coordinator: listener, sweeper, and the shared state they
/// operate on.
pub struct Coordinator<C: Clock, G: IdGen> {
    pub engine: JobEngine<C, G>,
    pub registry: Arc<DeviceRegistry<C>>,
    pub activity: Arc<ActivityTable>,
    addr: SocketAddr,
    stop: CancellationToken,
    listener_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
}

impl Coordinator<SystemClock, UuidIdGen> {
    /// Start with the production clock and ID source. The planner is
    /// LLM-backed when a planning endpoint is configured, deterministic
    /// otherwise.
    pub async fn start(config: CoordinatorConfig) -> std::io::Result<Self> {
        let planner: Arc<dyn PlannerStrategy> = match crate::env::planner_endpoint() {
            Some(endpoint) => Arc::new(AiPlanner::new(endpoint)),
            None => Arc::new(SmartPlanner::new()),
        };
        Self::start_with(config, SystemClock, UuidIdGen, planner).await
    }
}

impl<C: Clock, G: IdGen + 'static> Coordinator<C, G> {
    pub async fn start_with(
        config: CoordinatorConfig,
        clock: C,
        ids: G,
        planner: Arc<dyn PlannerStrategy>,
    ) -> std::io::Result<Self> {
        let registry = Arc::new(DeviceRegistry::new(clock.clone()));
        let activity = Arc::new(ActivityTable::new());
        let transport =
            Arc::new(TcpTransport::new(config.psk.clone(), config.per_worker_window));

        let engine = JobEngine::new(
            config.clone(),
            clock,
            ids,
            Arc::clone(&registry),
            CostEstimator::new(),
            planner,
            transport,
            Arc::clone(&activity),
        );

        let stop = CancellationToken::new();
        let ctx = Arc::new(ListenCtx {
            engine: engine.clone(),
            registry: Arc::clone(&registry),
            activity: Arc::clone(&activity),
            psk: config.psk.clone(),
        });
        let (addr, listener_handle) =
            listener::spawn(&config.bind_addr, ctx, stop.clone()).await?;
        let sweeper_handle =
            sweeper::spawn(config, Arc::clone(&registry), engine.clone(), stop.clone());

        Ok(Self { engine, registry, activity, addr, stop, listener_handle, sweeper_handle })
    }

    /// The bound control-plane address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting work, drain in-flight jobs, then stop the loops.
    pub async fn shutdown(self) {
        self.stop.cancel();
        if !self.engine.drain(DRAIN_TIMEOUT).await {
            tracing::warn!("shutdown drain timed out with jobs still active");
        }
        let _ = self.listener_handle.await;
        let _ = self.sweeper_handle.await;
        tracing::info!("coordinator stopped");
    }
}
