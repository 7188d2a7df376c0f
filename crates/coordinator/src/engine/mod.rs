// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job engine: owns the job/task tables and drives plan execution.
//!
//! Tasks live in a flat per-job table keyed by id; groups fan out in
//! parallel, groups run in order. One lock per job; the engine never
//! holds it across an RPC.

mod dispatch;

use crate::activity::ActivityTable;
use crate::config::CoordinatorConfig;
use crate::cost::CostEstimator;
use crate::planner::{validate_plan, PlanContext, PlannerStrategy};
use crate::registry::DeviceRegistry;
use crate::router::{self, RouteContext};
use crate::transport::Transport;
use em_core::{
    Clock, DeviceId, ErrorKind, Event, Fault, IdGen, Job, JobId, JobState, Plan, PlanRequest,
    PlanTask, RoutingPolicy, Task, TaskId, TaskKind, TaskState,
};
use em_proto::{JobView, RoutedOutcome, RunningTask};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// A job with its tasks, guarded by one lock.
pub(crate) struct JobRecord {
    pub job: Job,
    pub tasks: IndexMap<TaskId, Task>,
    /// Routing inputs captured at submission, reused for late binding
    /// and failure rerouting.
    pub policy: RoutingPolicy,
    pub force_device_id: Option<DeviceId>,
}

impl JobRecord {
    fn view(&self) -> JobView {
        JobView { job: self.job.clone(), tasks: self.tasks.values().cloned().collect() }
    }
}

pub(crate) struct JobCell {
    pub record: Mutex<JobRecord>,
    pub cancel: CancellationToken,
    pub state_tx: watch::Sender<JobState>,
}

pub(crate) struct EngineInner<C: Clock, G: IdGen> {
    pub config: CoordinatorConfig,
    pub clock: C,
    pub ids: G,
    pub registry: Arc<DeviceRegistry<C>>,
    pub estimator: CostEstimator,
    pub planner: Arc<dyn PlannerStrategy>,
    pub transport: Arc<dyn Transport>,
    pub activity: Arc<ActivityTable>,
    pub jobs: Mutex<HashMap<JobId, Arc<JobCell>>>,
    /// Coordinator-side in-flight task count per device (tie-breaking).
    pub in_flight: Mutex<HashMap<DeviceId, usize>>,
    pub events: broadcast::Sender<Event>,
}

impl<C: Clock, G: IdGen> EngineInner<C, G> {
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Load signal for tie-breaking: the coordinator's own in-flight
    /// count, or the device's last self-reported count if higher (a
    /// worker may carry tasks this coordinator did not dispatch).
    pub(crate) fn running_on(&self, device: &DeviceId) -> usize {
        let local = self.in_flight.lock().get(device).copied().unwrap_or(0);
        let reported = self.activity.last_running_tasks(device).unwrap_or(0) as usize;
        local.max(reported)
    }

    fn plan_context(&self) -> PlanContext {
        PlanContext {
            devices: self.registry.list(),
            local_device: self.config.local_device_id.clone(),
        }
    }

    /// Route one plan task against the current registry snapshot.
    pub(crate) fn route_task(
        &self,
        task: &PlanTask,
        policy: RoutingPolicy,
        forced: Option<&DeviceId>,
    ) -> Result<DeviceId, Fault> {
        let devices = self.registry.list();
        let running = |id: &DeviceId| self.running_on(id);
        let ctx = RouteContext {
            devices: &devices,
            estimator: &self.estimator,
            running: &running,
            local_device: self.config.local_device_id.as_ref(),
        };
        router::select(&ctx, task, policy, forced)
    }
}

/// The coordinator's job engine.
pub struct JobEngine<C: Clock, G: IdGen> {
    inner: Arc<EngineInner<C, G>>,
}

impl<C: Clock, G: IdGen> Clone for JobEngine<C, G> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock, G: IdGen + 'static> JobEngine<C, G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        clock: C,
        ids: G,
        registry: Arc<DeviceRegistry<C>>,
        estimator: CostEstimator,
        planner: Arc<dyn PlannerStrategy>,
        transport: Arc<dyn Transport>,
        activity: Arc<ActivityTable>,
    ) -> Self {
        let (events, _) = broadcast::channel(512);
        Self {
            inner: Arc::new(EngineInner {
                config,
                clock,
                ids,
                registry,
                estimator,
                planner,
                transport,
                activity,
                jobs: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Subscribe to task/job transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Synthesize and validate a plan without creating a job.
    pub async fn preview_plan(&self, request: &PlanRequest) -> Result<Plan, Fault> {
        let ctx = self.inner.plan_context();
        let plan = self.inner.planner.plan(request, &ctx).await?;
        validate_plan(&plan, &ctx)?;
        Ok(plan)
    }

    /// Plan, route, persist, and start executing a request.
    ///
    /// Routing runs at submission for every task that is not late-bound;
    /// a routing failure means no job is created.
    pub async fn submit_job(&self, request: &PlanRequest) -> Result<JobId, Fault> {
        if self.active_jobs() >= self.inner.config.max_active_jobs {
            return Err(Fault::new(
                ErrorKind::TooManyJobs,
                format!("{} active jobs at the watermark", self.inner.config.max_active_jobs),
            ));
        }

        let plan = self.preview_plan(request).await?;
        self.start_plan(plan, request).await
    }

    /// Validate and start a caller-provided plan, bypassing the planner.
    pub async fn submit_plan(&self, plan: Plan, request: &PlanRequest) -> Result<JobId, Fault> {
        if self.active_jobs() >= self.inner.config.max_active_jobs {
            return Err(Fault::new(
                ErrorKind::TooManyJobs,
                format!("{} active jobs at the watermark", self.inner.config.max_active_jobs),
            ));
        }
        let ctx = self.inner.plan_context();
        validate_plan(&plan, &ctx)?;
        self.start_plan(plan, request).await
    }

    /// Persist a validated plan as a job and spawn its dispatcher.
    async fn start_plan(&self, plan: Plan, request: &PlanRequest) -> Result<JobId, Fault> {
        let inner = &self.inner;
        let now = inner.clock.epoch_ms();
        let job_id = JobId::new(inner.ids.next());

        // Route up front so a hopeless request fails without a job.
        let mut groups: Vec<Vec<Task>> = Vec::with_capacity(plan.groups.len());
        for (group_idx, plan_group) in plan.groups.iter().enumerate() {
            let mut group = Vec::with_capacity(plan_group.len());
            for (task_idx, plan_task) in plan_group.iter().enumerate() {
                let device = match (&plan_task.device, plan_task.bind_at_dispatch) {
                    (Some(device), _) => Some(device.clone()),
                    (None, true) => None,
                    (None, false) => Some(inner.route_task(
                        plan_task,
                        request.policy,
                        request.force_device_id.as_ref(),
                    )?),
                };
                group.push(Task {
                    id: TaskId::new(inner.ids.next()),
                    job_id: job_id.clone(),
                    kind: plan_task.kind,
                    input: plan_task.input.clone(),
                    required_caps: plan_task.required_caps.clone(),
                    prompt_tokens: plan_task.prompt_tokens,
                    output_tokens: plan_task.output_tokens,
                    ram_mb: plan_task.ram_mb,
                    device,
                    bind_at_dispatch: plan_task.bind_at_dispatch,
                    critical: plan_task.critical,
                    reroute_on_failure: plan_task.reroutes(),
                    group: group_idx,
                    index: task_idx,
                    state: TaskState::Pending,
                    attempts: 0,
                    started_at_ms: None,
                    ended_at_ms: None,
                    result: None,
                    error: None,
                });
            }
            groups.push(group);
        }

        let id_groups: Vec<Vec<TaskId>> =
            groups.iter().map(|g| g.iter().map(|t| t.id.clone()).collect()).collect();
        let job = Job::new(job_id.clone(), request.text.clone(), id_groups, now);
        let mut tasks = IndexMap::new();
        for task in groups.into_iter().flatten() {
            tasks.insert(task.id.clone(), task);
        }

        let (state_tx, _) = watch::channel(JobState::Submitted);
        let cell = Arc::new(JobCell {
            record: Mutex::new(JobRecord {
                job,
                tasks,
                policy: request.policy,
                force_device_id: request.force_device_id.clone(),
            }),
            cancel: CancellationToken::new(),
            state_tx,
        });
        self.inner.jobs.lock().insert(job_id.clone(), Arc::clone(&cell));
        self.inner.emit(Event::JobStateChanged { job_id: job_id.clone(), state: JobState::Submitted });

        let inner = Arc::clone(&self.inner);
        let spawned_id = job_id.clone();
        tokio::spawn(async move {
            dispatch::run_job(inner, cell, spawned_id).await;
        });

        Ok(job_id)
    }

    pub fn get_job(&self, job_id: &JobId) -> Result<JobView, Fault> {
        let jobs = self.inner.jobs.lock();
        let cell = jobs
            .get(job_id)
            .ok_or_else(|| Fault::new(ErrorKind::NotFound, format!("job not found: {job_id}")))?;
        let view = cell.record.lock().view();
        Ok(view)
    }

    /// Flag the job cancelled. The dispatcher stops scheduling further
    /// groups and in-flight tasks get a Cancel over the transport.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<(), Fault> {
        let cell = {
            let jobs = self.inner.jobs.lock();
            jobs.get(job_id).cloned().ok_or_else(|| {
                Fault::new(ErrorKind::NotFound, format!("job not found: {job_id}"))
            })?
        };
        cell.cancel.cancel();
        Ok(())
    }

    /// Wait for a job to reach a terminal state.
    pub async fn wait_terminal(&self, job_id: &JobId) -> Result<JobView, Fault> {
        let cell = {
            let jobs = self.inner.jobs.lock();
            jobs.get(job_id).cloned().ok_or_else(|| {
                Fault::new(ErrorKind::NotFound, format!("job not found: {job_id}"))
            })?
        };
        let mut state_rx = cell.state_tx.subscribe();
        loop {
            if state_rx.borrow().is_terminal() {
                return Ok(cell.record.lock().view());
            }
            if state_rx.changed().await.is_err() {
                // Dispatcher gone; report whatever is recorded.
                return Ok(cell.record.lock().view());
            }
        }
    }

    /// One-shot routed command: a single echo-style task executed through
    /// the normal plan/route/dispatch path and awaited inline.
    pub async fn routed_command(
        &self,
        command: &str,
        args: &[String],
        policy: RoutingPolicy,
        force_device_id: Option<DeviceId>,
    ) -> Result<RoutedOutcome, Fault> {
        let input = if args.is_empty() {
            command.to_string()
        } else {
            format!("{command} {}", args.join(" "))
        };

        let mut request = PlanRequest::text(input.clone());
        request.policy = policy;
        request.force_device_id = force_device_id;

        let plan = Plan::single(PlanTask::new(TaskKind::Echo, input), "routed command");
        let job_id = self.start_plan(plan, &request).await?;
        let view = self.wait_terminal(&job_id).await?;

        let task = view
            .tasks
            .first()
            .ok_or_else(|| Fault::internal("routed command produced no task"))?;
        let device_id = task
            .device
            .clone()
            .ok_or_else(|| Fault::new(ErrorKind::NoEligibleDevice, "command was never routed"))?;
        let device_name =
            self.inner.registry.get(&device_id).map(|d| d.info.name).unwrap_or_default();

        let elapsed_ms = match (task.started_at_ms, task.ended_at_ms) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => 0,
        };
        Ok(RoutedOutcome {
            device_id,
            device_name,
            exit_code: if task.state == TaskState::Done { 0 } else { 1 },
            stdout: task.result.clone().unwrap_or_default(),
            stderr: task.error.as_ref().map(|f| f.to_string()).unwrap_or_default(),
            elapsed_ms,
        })
    }

    /// Non-terminal job count (the SubmitJob watermark input).
    pub fn active_jobs(&self) -> usize {
        let jobs = self.inner.jobs.lock();
        jobs.values().filter(|cell| !cell.record.lock().job.is_terminal()).count()
    }

    /// Tasks currently running, for the activity read API.
    pub fn running_tasks(&self) -> Vec<RunningTask> {
        let jobs = self.inner.jobs.lock();
        let mut running: Vec<RunningTask> = jobs
            .values()
            .flat_map(|cell| {
                let record = cell.record.lock();
                record
                    .tasks
                    .values()
                    .filter(|t| t.state == TaskState::Running)
                    .map(|t| RunningTask {
                        task_id: t.id.clone(),
                        job_id: t.job_id.clone(),
                        kind: t.kind,
                        device_id: t.device.clone(),
                        started_at_ms: t.started_at_ms,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        running.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        running
    }

    /// Wait for every job to reach a terminal state, up to `timeout`.
    /// Returns false if jobs were still active when time ran out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active_jobs() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Evict terminal jobs older than the retention window.
    pub fn evict_expired(&self) -> usize {
        let now = self.inner.clock.epoch_ms();
        let retention_ms = self.inner.config.job_retention.as_millis() as u64;
        let mut evicted = Vec::new();
        {
            let mut jobs = self.inner.jobs.lock();
            jobs.retain(|job_id, cell| {
                let record = cell.record.lock();
                let expired = record.job.is_terminal()
                    && record
                        .job
                        .finished_at_ms
                        .is_some_and(|t| now.saturating_sub(t) >= retention_ms);
                if expired {
                    evicted.push(job_id.clone());
                }
                !expired
            });
        }
        for job_id in &evicted {
            self.inner.emit(Event::JobEvicted { job_id: job_id.clone() });
        }
        evicted.len()
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
