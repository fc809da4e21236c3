//! Scheduler core: the poll loop, the job registry, and the client
//! handle. All registry/queue/tracker mutations happen under one
//! coordinating lock; worker results re-enter through an mpsc channel
//! and are applied under the same lock, so there is no path to a lost
//! update or a duplicate dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempo_core::config::{SchedulerConfig, TempoConfig};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::deps::DependencyTracker;
use crate::error::{Result, SchedulerError};
use crate::executor::{AttemptOutcome, DispatchError, ExecutionOutcome, ExecutorPool};
use crate::queue::ReadyQueue;
use crate::schedule::{compute_next_run, validate_schedule, Schedule};
use crate::task::JobTask;
use crate::types::{JobId, JobResult, JobSnapshot, JobSpec, JobStatus, Priority};

/// Outcome reports in flight at once; workers block (briefly) when full.
const OUTCOME_CHANNEL_CAPACITY: usize = 256;

/// Registry record for one job.
struct JobRecord {
    name: String,
    task: Arc<dyn JobTask>,
    schedule: Schedule,
    priority: Priority,
    status: JobStatus,
    retry_count: u32,
    max_retries: u32,
    history: Vec<JobResult>,
    created_at: DateTime<Utc>,
    /// Start time of the most recent execution; recurrence anchor.
    last_run: Option<DateTime<Utc>>,
    /// Due time of the live ready-queue entry, if any.
    next_run: Option<DateTime<Utc>>,
    /// Consecutive dependency defers; drives the defer backoff.
    defer_count: u32,
    /// Monotonic submission counter; orders `list_jobs` output.
    submitted_seq: u64,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<JobId, JobRecord>,
    queue: ReadyQueue,
    deps: DependencyTracker,
    submissions: u64,
}

/// Shared handle for job management while the engine loop runs.
///
/// Cheap to clone; every method takes the coordinating lock for the
/// duration of the call.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Arc<Mutex<SchedulerState>>,
    executor: ExecutorPool,
}

impl SchedulerHandle {
    /// Validate and register a job. Returns its assigned id.
    ///
    /// Rejected synchronously: malformed/unsatisfiable schedules,
    /// `depends_on` entries naming jobs the scheduler has never seen.
    pub fn submit(&self, spec: JobSpec) -> Result<JobId> {
        let now = Utc::now();
        validate_schedule(&spec.schedule, now)?;

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        for dep in &spec.depends_on {
            if !state.deps.is_known(dep) {
                return Err(SchedulerError::UnknownDependency { id: *dep });
            }
        }
        let Some(first_due) = compute_next_run(&spec.schedule, None, now) else {
            return Err(SchedulerError::InvalidSchedule(
                "schedule has no upcoming occurrence".to_string(),
            ));
        };

        let id = Uuid::new_v4();
        let submitted_seq = state.submissions;
        state.submissions += 1;
        state.deps.add_job(id, spec.depends_on.iter().copied().collect());
        debug_assert!(!state.queue.contains(&id));
        state.queue.insert(id, first_due, spec.priority);
        state.jobs.insert(
            id,
            JobRecord {
                name: spec.name.clone(),
                task: spec.task,
                schedule: spec.schedule,
                priority: spec.priority,
                status: JobStatus::Scheduled,
                retry_count: 0,
                max_retries: spec.max_retries,
                history: Vec::new(),
                created_at: now,
                last_run: None,
                next_run: Some(first_due),
                defer_count: 0,
                submitted_seq,
            },
        );
        info!(job_id = %id, name = %spec.name, due = %first_due, "job submitted");
        Ok(id)
    }

    /// Cancel a job. Idempotent: unknown or already-terminal ids are a
    /// no-op. A running execution is interrupted cooperatively; if the
    /// task ignores the token it finishes and its result is discarded.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        let was_running = job.status == JobStatus::Running;
        job.status = JobStatus::Cancelled;
        job.next_run = None;
        state.queue.remove(&id);
        state.deps.record_outcome(id, JobStatus::Cancelled);
        drop(guard);

        if was_running {
            self.executor.cancel(&id);
        }
        info!(job_id = %id, "job cancelled");
        Ok(())
    }

    /// Hold a scheduled job out of the ready queue until resumed.
    pub fn pause(&self, id: JobId) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(SchedulerError::JobNotFound { id })?;
        if job.status != JobStatus::Scheduled {
            return Err(SchedulerError::InvalidTransition {
                from: job.status,
                to: JobStatus::Paused,
            });
        }
        job.status = JobStatus::Paused;
        job.next_run = None;
        state.queue.remove(&id);
        info!(job_id = %id, "job paused");
        Ok(())
    }

    /// Put a paused job back in the ready queue, recomputing its due
    /// time from now. A schedule that ran out while paused leaves the
    /// job completed.
    pub fn resume(&self, id: JobId) -> Result<()> {
        let now = Utc::now();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(SchedulerError::JobNotFound { id })?;
        if job.status != JobStatus::Paused {
            return Err(SchedulerError::InvalidTransition {
                from: job.status,
                to: JobStatus::Scheduled,
            });
        }
        // A pending retry survives the pause; it fires immediately.
        let next = if job.retry_count > 0 {
            Some(now)
        } else {
            compute_next_run(&job.schedule, job.last_run, now)
        };
        match next {
            Some(due) => {
                let priority = job.priority;
                job.status = JobStatus::Scheduled;
                job.next_run = Some(due);
                state.queue.insert(id, due, priority);
                info!(job_id = %id, due = %due, "job resumed");
            }
            None => {
                job.status = JobStatus::Completed;
                job.next_run = None;
                info!(job_id = %id, "schedule exhausted while paused; job completed");
            }
        }
        Ok(())
    }

    /// Current lifecycle status.
    pub fn status(&self, id: JobId) -> Result<JobStatus> {
        let guard = self.state.lock().unwrap();
        guard
            .jobs
            .get(&id)
            .map(|job| job.status)
            .ok_or(SchedulerError::JobNotFound { id })
    }

    /// Per-execution outcome records, oldest first.
    pub fn history(&self, id: JobId) -> Result<Vec<JobResult>> {
        let guard = self.state.lock().unwrap();
        guard
            .jobs
            .get(&id)
            .map(|job| job.history.clone())
            .ok_or(SchedulerError::JobNotFound { id })
    }

    /// Add a prerequisite edge to an existing job, rejecting cycles.
    pub fn add_dependency(&self, job: JobId, prerequisite: JobId) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if !state.jobs.contains_key(&job) {
            return Err(SchedulerError::JobNotFound { id: job });
        }
        if !state.deps.is_known(&prerequisite) {
            return Err(SchedulerError::UnknownDependency { id: prerequisite });
        }
        state.deps.add_dependency(job, prerequisite)
    }

    /// Drop a job from the registry. Non-terminal jobs are cancelled
    /// first; the recorded dependency outcome survives for dependents.
    pub fn remove(&self, id: JobId) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Err(SchedulerError::JobNotFound { id });
        };
        let was_running = job.status == JobStatus::Running;
        if !job.status.is_terminal() {
            state.deps.record_outcome(id, JobStatus::Cancelled);
        }
        state.jobs.remove(&id);
        state.queue.remove(&id);
        state.deps.remove_job(&id);
        drop(guard);

        if was_running {
            self.executor.cancel(&id);
        }
        info!(job_id = %id, "job removed");
        Ok(())
    }

    /// Point-in-time snapshots of every registered job, ordered by
    /// creation time.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        let guard = self.state.lock().unwrap();
        let mut records: Vec<(&JobId, &JobRecord)> = guard.jobs.iter().collect();
        records.sort_by_key(|(_, job)| job.submitted_seq);
        records
            .into_iter()
            .map(|(id, job)| JobSnapshot {
                id: *id,
                name: job.name.clone(),
                status: job.status,
                priority: job.priority,
                next_run: job.next_run,
                last_run: job.last_run,
                retry_count: job.retry_count,
                max_retries: job.max_retries,
                depends_on: guard.deps.prerequisites(id),
                created_at: job.created_at,
            })
            .collect()
    }
}

/// Core scheduler: owns the poll loop and the outcome channel.
pub struct SchedulerEngine {
    state: Arc<Mutex<SchedulerState>>,
    executor: ExecutorPool,
    outcome_rx: mpsc::Receiver<ExecutionOutcome>,
    config: SchedulerConfig,
    shutdown_grace: Duration,
}

impl SchedulerEngine {
    /// Build an engine from config. One instance per process region;
    /// there is no ambient global scheduler.
    pub fn new(config: &TempoConfig) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SchedulerState::default())),
            executor: ExecutorPool::new(config.executor.workers, outcome_tx),
            outcome_rx,
            config: config.scheduler.clone(),
            shutdown_grace: Duration::from_millis(config.executor.shutdown_grace_ms),
        }
    }

    /// Client handle for submitting and managing jobs.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: Arc::clone(&self.state),
            executor: self.executor.clone(),
        }
    }

    /// Main event loop. Polls at the configured cadence until
    /// `shutdown` broadcasts `true`, then drains the worker pool.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            "scheduler engine started"
        );
        let mut tick = tokio::time::interval(Duration::from_millis(
            self.config.poll_interval_ms.max(1),
        ));
        loop {
            tokio::select! {
                _ = tick.tick() => self.tick(Utc::now()),
                Some(outcome) = self.outcome_rx.recv() => self.apply_outcome(outcome),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
        self.executor.shutdown(self.shutdown_grace).await;
        // Apply outcomes reported during the grace period so histories
        // are complete before the engine drops.
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.apply_outcome(outcome);
        }
        let pending = self.state.lock().unwrap().queue.len();
        info!(pending, "scheduler engine stopped");
    }

    /// One poll cycle: pop every due entry and dispatch, defer, or drop
    /// it.
    fn tick(&self, now: DateTime<Utc>) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        while let Some(entry) = state.queue.pop_due(now) {
            let Some(job) = state.jobs.get_mut(&entry.job_id) else {
                continue; // removed after its entry was queued
            };
            match job.status {
                JobStatus::Paused
                | JobStatus::Cancelled
                | JobStatus::Completed
                | JobStatus::Failed => {
                    // Stale entry for a held or finished job.
                    continue;
                }
                JobStatus::Running => {
                    // Previous execution still in flight: defer this
                    // firing instead of overlapping.
                    let due = now + chrono::Duration::milliseconds(
                        self.config.poll_interval_ms.max(1) as i64,
                    );
                    let priority = job.priority;
                    job.next_run = Some(due);
                    state.queue.insert(entry.job_id, due, priority);
                }
                JobStatus::Scheduled => {
                    if !state.deps.can_execute(&entry.job_id) {
                        let defer_ms = self.dependency_defer_ms(job.defer_count);
                        job.defer_count = job.defer_count.saturating_add(1);
                        if defer_ms >= self.config.dependency_defer_cap_ms {
                            warn!(
                                job_id = %entry.job_id,
                                name = %job.name,
                                "prerequisites still unresolved; deferring again"
                            );
                        }
                        let due = now + chrono::Duration::milliseconds(defer_ms as i64);
                        let priority = job.priority;
                        job.next_run = Some(due);
                        state.queue.insert(entry.job_id, due, priority);
                        continue;
                    }

                    let attempt = job.retry_count + 1;
                    let task = Arc::clone(&job.task);
                    match self.executor.try_dispatch(entry.job_id, attempt, task) {
                        Ok(()) => {
                            job.status = JobStatus::Running;
                            job.last_run = Some(now);
                            job.next_run = None;
                            job.defer_count = 0;
                            info!(
                                job_id = %entry.job_id,
                                name = %job.name,
                                attempt,
                                "job dispatched"
                            );
                        }
                        Err(DispatchError::Saturated) => {
                            // All workers busy: try again next tick.
                            let due = now + chrono::Duration::milliseconds(
                                self.config.poll_interval_ms.max(1) as i64,
                            );
                            let priority = job.priority;
                            job.next_run = Some(due);
                            state.queue.insert(entry.job_id, due, priority);
                            debug!(job_id = %entry.job_id, "executor saturated; re-queued");
                        }
                        Err(DispatchError::Overlapping | DispatchError::ShuttingDown) => {
                            let due = now + chrono::Duration::milliseconds(
                                self.config.poll_interval_ms.max(1) as i64,
                            );
                            let priority = job.priority;
                            job.next_run = Some(due);
                            state.queue.insert(entry.job_id, due, priority);
                        }
                    }
                }
            }
        }
    }

    /// Apply one worker report: record history, then reschedule, retry,
    /// or retire according to the outcome and the job's schedule.
    fn apply_outcome(&self, outcome: ExecutionOutcome) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let now = outcome.finished_at;
        let Some(job) = state.jobs.get_mut(&outcome.job_id) else {
            debug!(job_id = %outcome.job_id, "outcome for removed job discarded");
            return;
        };
        if job.status == JobStatus::Cancelled {
            // Cancelled mid-flight; whatever the task produced is
            // discarded.
            debug!(job_id = %outcome.job_id, "outcome for cancelled job discarded");
            return;
        }

        match outcome.outcome {
            AttemptOutcome::Cancelled => {
                job.status = JobStatus::Cancelled;
                job.next_run = None;
                state.queue.remove(&outcome.job_id);
                state.deps.record_outcome(outcome.job_id, JobStatus::Cancelled);
                info!(job_id = %outcome.job_id, "task stopped on cancellation");
            }

            AttemptOutcome::Completed => {
                job.history.push(JobResult {
                    job_id: outcome.job_id,
                    status: JobStatus::Completed,
                    finished_at: now,
                    error: None,
                    duration_ms: outcome.duration_ms,
                });
                // A success grants the next occurrence a fresh budget.
                job.retry_count = 0;
                state
                    .deps
                    .record_outcome(outcome.job_id, JobStatus::Completed);
                match compute_next_run(&job.schedule, job.last_run, now) {
                    Some(next) => {
                        let priority = job.priority;
                        job.status = JobStatus::Scheduled;
                        job.next_run = Some(next);
                        state.queue.insert(outcome.job_id, next, priority);
                        info!(
                            job_id = %outcome.job_id,
                            next = %next,
                            "job completed; next occurrence scheduled"
                        );
                    }
                    None => {
                        job.status = JobStatus::Completed;
                        job.next_run = None;
                        state.queue.remove(&outcome.job_id);
                        info!(job_id = %outcome.job_id, "job completed; schedule exhausted");
                    }
                }
            }

            AttemptOutcome::Failed => {
                job.history.push(JobResult {
                    job_id: outcome.job_id,
                    status: JobStatus::Failed,
                    finished_at: now,
                    error: outcome.error.clone(),
                    duration_ms: outcome.duration_ms,
                });
                if job.retry_count < job.max_retries {
                    let delay_ms = self
                        .config
                        .retry_base_ms
                        .saturating_mul(1u64 << job.retry_count.min(20));
                    job.retry_count += 1;
                    let due = now + chrono::Duration::milliseconds(delay_ms as i64);
                    let priority = job.priority;
                    job.status = JobStatus::Scheduled;
                    job.next_run = Some(due);
                    state.queue.insert(outcome.job_id, due, priority);
                    warn!(
                        job_id = %outcome.job_id,
                        retry = job.retry_count,
                        max_retries = job.max_retries,
                        delay_ms,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "job failed; retrying with backoff"
                    );
                } else {
                    state.deps.record_outcome(outcome.job_id, JobStatus::Failed);
                    // Exhausted retries end this occurrence only; a
                    // recurring schedule still fires the next one.
                    match compute_next_run(&job.schedule, job.last_run, now) {
                        Some(next) => {
                            let priority = job.priority;
                            job.retry_count = 0;
                            job.status = JobStatus::Scheduled;
                            job.next_run = Some(next);
                            state.queue.insert(outcome.job_id, next, priority);
                            warn!(
                                job_id = %outcome.job_id,
                                next = %next,
                                "retries exhausted; next scheduled occurrence unaffected"
                            );
                        }
                        None => {
                            job.status = JobStatus::Failed;
                            job.next_run = None;
                            state.queue.remove(&outcome.job_id);
                            warn!(
                                job_id = %outcome.job_id,
                                error = outcome.error.as_deref().unwrap_or("unknown"),
                                "job failed permanently; retries exhausted"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Doubling defer delay for unmet dependencies, bounded by the cap.
    fn dependency_defer_ms(&self, defers: u32) -> u64 {
        let base = self.config.dependency_defer_ms.max(1);
        let cap = self.config.dependency_defer_cap_ms.max(base);
        base.saturating_mul(1u64 << defers.min(20)).min(cap)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
