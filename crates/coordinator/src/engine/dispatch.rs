// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group-sequential, task-parallel dispatch with retry and rerouting.

use super::{EngineInner, JobCell};
use em_core::{
    Clock, DeviceId, ErrorKind, Event, Fault, IdGen, JobId, JobState, PlanTask, Task, TaskId,
    TaskState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Rebuild the router's view of a task from the stored row.
fn plan_view(task: &Task) -> PlanTask {
    let mut view = PlanTask::new(task.kind, task.input.clone());
    view.required_caps = task.required_caps.clone();
    view.prompt_tokens = task.prompt_tokens;
    view.output_tokens = task.output_tokens;
    view.ram_mb = task.ram_mb;
    view.bind_at_dispatch = task.bind_at_dispatch;
    view.critical = task.critical;
    view.reroute_on_failure = Some(task.reroute_on_failure);
    view
}

/// Upper bound on one group's wall clock: every task could burn all its
/// attempts and backoffs, plus configured slack.
fn group_bound<C: Clock, G: IdGen>(inner: &EngineInner<C, G>, deadlines: &[Duration]) -> Duration {
    let longest = deadlines.iter().copied().max().unwrap_or(Duration::ZERO);
    let attempts = inner.config.task_retries + 1;
    let backoff: Duration = inner.config.retry_backoff.iter().sum();
    longest * attempts + backoff + inner.config.group_await_slack
}

/// Drive one job to a terminal state.
pub(crate) async fn run_job<C: Clock, G: IdGen + 'static>(
    inner: Arc<EngineInner<C, G>>,
    cell: Arc<JobCell>,
    job_id: JobId,
) {
    let group_count = {
        let mut record = cell.record.lock();
        record.job.state = JobState::Running;
        record.job.groups.len()
    };
    // send_replace so the value moves even before anyone subscribes.
    cell.state_tx.send_replace(JobState::Running);
    inner.emit(Event::JobStateChanged { job_id: job_id.clone(), state: JobState::Running });

    for group_idx in 0..group_count {
        if cell.cancel.is_cancelled() {
            break;
        }

        let (task_ids, deadlines) = {
            let mut record = cell.record.lock();
            let ids: Vec<TaskId> = record.job.groups[group_idx].clone();
            for id in &ids {
                if let Some(task) = record.tasks.get_mut(id) {
                    task.mark_queued();
                }
            }
            let deadlines: Vec<Duration> = ids
                .iter()
                .filter_map(|id| record.tasks.get(id))
                .map(|t| Duration::from_millis(t.kind.default_timeout_ms()))
                .collect();
            (ids, deadlines)
        };
        for id in &task_ids {
            inner.emit(Event::TaskStateChanged {
                job_id: job_id.clone(),
                task_id: id.clone(),
                state: TaskState::Queued,
            });
        }

        let mut set = JoinSet::new();
        for task_id in task_ids.clone() {
            let inner = Arc::clone(&inner);
            let cell = Arc::clone(&cell);
            let job_id = job_id.clone();
            set.spawn(async move {
                run_task_attempts(inner, cell, job_id, task_id).await;
            });
        }

        let bound = group_bound(&inner, &deadlines);
        let drained =
            tokio::time::timeout(bound, async { while set.join_next().await.is_some() {} }).await;
        if drained.is_err() {
            // Safety net only: attempts are individually bounded, so this
            // means a dispatch future wedged. Fail whatever is left.
            set.abort_all();
            let now = inner.clock.epoch_ms();
            let mut stuck = Vec::new();
            {
                let mut record = cell.record.lock();
                for id in &task_ids {
                    if let Some(task) = record.tasks.get_mut(id) {
                        if !task.is_terminal() {
                            task.mark_failed(
                                Fault::new(ErrorKind::TaskTimeout, "group await bound exceeded"),
                                now,
                            );
                            stuck.push(id.clone());
                        }
                    }
                }
            }
            for id in stuck {
                tracing::warn!(job_id = %job_id, task_id = %id, "task failed group await bound");
                inner.emit(Event::TaskStateChanged {
                    job_id: job_id.clone(),
                    task_id: id,
                    state: TaskState::Failed,
                });
            }
        }
    }

    finalize(&inner, &cell, &job_id);
}

/// Attempt loop for one task: route (or re-route), dispatch, classify
/// failures, back off, and settle on a terminal state.
async fn run_task_attempts<C: Clock, G: IdGen>(
    inner: Arc<EngineInner<C, G>>,
    cell: Arc<JobCell>,
    job_id: JobId,
    task_id: TaskId,
) {
    let max_attempts = inner.config.task_retries + 1;

    loop {
        // Snapshot what this attempt needs; locks never cross the RPC.
        let (attempt, device, view, policy, forced) = {
            let mut record = cell.record.lock();
            let policy = record.policy;
            let forced = record.force_device_id.clone();
            let Some(task) = record.tasks.get_mut(&task_id) else { return };
            task.attempts += 1;
            (task.attempts, task.device.clone(), plan_view(task), policy, forced)
        };

        // Late binding / rerouting: consult the router against the
        // registry as it is right now.
        let device = match device {
            Some(device) => device,
            None => match inner.route_task(&view, policy, forced.as_ref()) {
                Ok(device) => {
                    let mut record = cell.record.lock();
                    if let Some(task) = record.tasks.get_mut(&task_id) {
                        task.device = Some(device.clone());
                    }
                    device
                }
                Err(fault) => {
                    if attempt < max_attempts && !cell.cancel.is_cancelled() {
                        if backoff(&inner, &cell, attempt).await.is_err() {
                            settle_cancelled(&inner, &cell, &job_id, &task_id);
                            return;
                        }
                        continue;
                    }
                    settle_failed(&inner, &cell, &job_id, &task_id, fault);
                    return;
                }
            },
        };

        // The assigned device must still be live when we dispatch.
        let fault = match inner.registry.get(&device) {
            Ok(entry) if entry.is_routable() => {
                dispatch_once(&inner, &cell, &job_id, &task_id, &device, &entry.info.addr).await
            }
            Ok(entry) => Some(Fault::new(
                ErrorKind::DeviceNotLive,
                format!("device {} is {}", device, entry.liveness),
            )),
            Err(e) => Some(e.into()),
        };

        let Some(fault) = fault else { return };
        if fault.kind == ErrorKind::Cancelled {
            settle_cancelled(&inner, &cell, &job_id, &task_id);
            return;
        }

        let kind = view.kind;
        if fault.kind.is_transient_for(kind) && attempt < max_attempts {
            tracing::info!(
                job_id = %job_id,
                task_id = %task_id,
                device_id = %device,
                attempt,
                error = %fault,
                "transient task failure, retrying"
            );
            {
                let mut record = cell.record.lock();
                if let Some(task) = record.tasks.get_mut(&task_id) {
                    if task.reroute_on_failure {
                        // Rebind from the then-current registry next attempt.
                        task.device = None;
                    }
                }
            }
            if backoff(&inner, &cell, attempt).await.is_err() {
                settle_cancelled(&inner, &cell, &job_id, &task_id);
                return;
            }
            continue;
        }

        settle_failed(&inner, &cell, &job_id, &task_id, fault);
        return;
    }
}

/// One transport call. Returns `None` on success (task settled as done),
/// `Some(fault)` when the attempt failed, with `Cancelled` reserved for
/// job cancellation.
async fn dispatch_once<C: Clock, G: IdGen>(
    inner: &EngineInner<C, G>,
    cell: &JobCell,
    job_id: &JobId,
    task_id: &TaskId,
    device: &DeviceId,
    addr: &str,
) -> Option<Fault> {
    let now = inner.clock.epoch_ms();
    let wire_task = {
        let mut record = cell.record.lock();
        let task = record.tasks.get_mut(task_id)?;
        task.mark_running(now);
        task.clone()
    };
    inner.emit(Event::TaskStateChanged {
        job_id: job_id.clone(),
        task_id: task_id.clone(),
        state: TaskState::Running,
    });

    {
        let mut in_flight = inner.in_flight.lock();
        *in_flight.entry(device.clone()).or_insert(0) += 1;
    }

    let deadline = Duration::from_millis(wire_task.kind.default_timeout_ms());
    let outcome = tokio::select! {
        _ = cell.cancel.cancelled() => {
            // Best effort: tell the worker to stop at its next safe point.
            let _ = inner.transport.cancel(addr, task_id).await;
            Err(Fault::cancelled())
        }
        result = tokio::time::timeout(deadline, inner.transport.run_task(addr, &wire_task, deadline)) => {
            match result {
                Err(_) => Err(Fault::new(ErrorKind::TaskTimeout, "task deadline exceeded")),
                Ok(Ok(r)) => match r.error {
                    None => Ok(r.result),
                    Some(fault) => Err(fault),
                },
                Ok(Err(fault)) => Err(fault),
            }
        }
    };

    {
        let mut in_flight = inner.in_flight.lock();
        if let Some(count) = in_flight.get_mut(device) {
            *count = count.saturating_sub(1);
        }
    }

    match outcome {
        Ok(result) => {
            let now = inner.clock.epoch_ms();
            {
                let mut record = cell.record.lock();
                if let Some(task) = record.tasks.get_mut(task_id) {
                    task.mark_done(result, now);
                }
            }
            inner.emit(Event::TaskStateChanged {
                job_id: job_id.clone(),
                task_id: task_id.clone(),
                state: TaskState::Done,
            });
            None
        }
        Err(fault) => Some(fault),
    }
}

/// Sleep before a retry, aborting early when the job gets cancelled.
async fn backoff<C: Clock, G: IdGen>(
    inner: &EngineInner<C, G>,
    cell: &JobCell,
    attempt: u32,
) -> Result<(), ()> {
    let wait = inner.config.backoff_for_attempt(attempt);
    tokio::select! {
        _ = cell.cancel.cancelled() => Err(()),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}

fn settle_failed<C: Clock, G: IdGen>(
    inner: &EngineInner<C, G>,
    cell: &JobCell,
    job_id: &JobId,
    task_id: &TaskId,
    fault: Fault,
) {
    let now = inner.clock.epoch_ms();
    {
        let mut record = cell.record.lock();
        if let Some(task) = record.tasks.get_mut(task_id) {
            task.mark_failed(fault.clone(), now);
        }
    }
    tracing::warn!(job_id = %job_id, task_id = %task_id, error = %fault, "task failed");
    inner.emit(Event::TaskStateChanged {
        job_id: job_id.clone(),
        task_id: task_id.clone(),
        state: TaskState::Failed,
    });
}

fn settle_cancelled<C: Clock, G: IdGen>(
    inner: &EngineInner<C, G>,
    cell: &JobCell,
    job_id: &JobId,
    task_id: &TaskId,
) {
    let now = inner.clock.epoch_ms();
    {
        let mut record = cell.record.lock();
        if let Some(task) = record.tasks.get_mut(task_id) {
            task.mark_cancelled(now);
        }
    }
    inner.emit(Event::TaskStateChanged {
        job_id: job_id.clone(),
        task_id: task_id.clone(),
        state: TaskState::Cancelled,
    });
}

/// Reduce results and settle the job's terminal state.
fn finalize<C: Clock, G: IdGen>(inner: &EngineInner<C, G>, cell: &JobCell, job_id: &JobId) {
    let now = inner.clock.epoch_ms();
    let cancelled = cell.cancel.is_cancelled();

    let state = {
        let mut record = cell.record.lock();

        if cancelled {
            let ids: Vec<TaskId> = record.tasks.keys().cloned().collect();
            for id in ids {
                if let Some(task) = record.tasks.get_mut(&id) {
                    if !task.is_terminal() {
                        task.mark_cancelled(now);
                    }
                }
            }
            record.job.finish(JobState::Cancelled, None, now);
            JobState::Cancelled
        } else {
            // Reduction order is the table's insertion order, which is
            // group-then-index by construction.
            let reduced: Vec<String> = record
                .tasks
                .values()
                .map(|task| match (&task.result, &task.error) {
                    (Some(result), _) => result.clone(),
                    (None, Some(fault)) => fault.to_string(),
                    (None, None) => String::new(),
                })
                .collect();
            let all_critical_done = record
                .tasks
                .values()
                .filter(|t| t.critical)
                .all(|t| t.state == TaskState::Done);
            let state = if all_critical_done { JobState::Done } else { JobState::Failed };
            record.job.finish(state, Some(reduced.join("\n")), now);
            state
        }
    };

    cell.state_tx.send_replace(state);
    tracing::info!(job_id = %job_id, state = %state, "job finished");
    inner.emit(Event::JobStateChanged { job_id: job_id.clone(), state });
}
